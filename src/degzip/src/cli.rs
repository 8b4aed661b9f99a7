use clap::{Parser, Subcommand};

use crate::cmd::*;

mod args;
pub use args::*;

pub mod io;

pub const HYPHEN: &str = "-";

/// The CLI interface for the degzip application.
#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
pub struct Cli {
    /// The selected command.
    #[clap(subcommand)]
    pub command: DegzipCommand,

    #[clap(flatten)]
    pub verbosity: Verbosity,
}

/// The top-level commands supported by degzip.
#[derive(Debug, Subcommand)]
pub enum DegzipCommand {
    Inflate(inflate::Inflate),
    Config(config::ShowConfig),
}

impl Command for DegzipCommand {
    fn handle(self) -> eyre::Result<()> {
        match self {
            Self::Inflate(inflate) => inflate.handle(),
            Self::Config(config) => config.handle(),
        }
    }
}
