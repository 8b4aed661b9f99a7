use clap::Args;
use eyre::Context;

use super::Command;
use crate::cli::FilterArgs;

/// Prints the effective filter configuration as JSON.
#[derive(Debug, Args)]
pub struct ShowConfig {
    /// Prints the JSON on a single line.
    #[clap(long)]
    compact: bool,

    #[clap(flatten)]
    filter: FilterArgs,
}

impl Command for ShowConfig {
    fn handle(self) -> eyre::Result<()> {
        let config = self.filter.resolve()?;

        let json = if self.compact {
            serde_json::to_string(&config)
        } else {
            serde_json::to_string_pretty(&config)
        }
        .context("failed to serialize configuration")?;

        println!("{json}");
        Ok(())
    }
}
