use clap::{ArgAction, Args};
use degzip_filter::{Buffers, Config};
use degzip_utils::directive;
use eyre::Context;

/// Configures the verbosity of the builtin logger.
#[derive(Clone, Copy, Debug, Args)]
pub struct Verbosity {
    /// Configures the log verbosity of degzip.
    ///
    /// `-v` is Debug, `-vv` is Trace.
    #[clap(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

impl Verbosity {
    /// Configures the global logger based on the settings.
    pub fn setup(self) {
        let level = self.log_level();
        if let Err(e) = simple_logger::init_with_level(level) {
            eprintln!("failed to set up logging: {e}");
        }
    }

    fn log_level(self) -> log::Level {
        match self.verbose {
            0 => log::Level::Info,
            1 => log::Level::Debug,
            _ => log::Level::Trace,
        }
    }
}

/// Overrides for the filter configuration.
///
/// Anything not given here is taken from the `DEGZIP_*` environment
/// variables, or their defaults.
#[derive(Clone, Debug, Args)]
pub struct FilterArgs {
    /// Whether the filter is enabled, "on" or "off".
    #[clap(long, value_parser = directive::parse_flag)]
    pub enable: Option<bool>,

    /// The output buffers to use, as "<number> <size>".
    ///
    /// Sizes accept the suffixes k, m and g, e.g. "32 4k".
    #[clap(long, value_parser = directive::parse_buffers)]
    pub buffers: Option<(usize, usize)>,

    /// The maximum inflated body size; 0 disables the limit.
    #[clap(long, value_parser = directive::parse_size)]
    pub max_size: Option<u64>,

    /// The base two logarithm of the gzip window size.
    #[clap(long)]
    pub window_bits: Option<u8>,
}

impl FilterArgs {
    /// Builds the effective configuration from environment and
    /// command line.
    pub fn resolve(&self) -> eyre::Result<Config> {
        let mut config = Config::from_env().context("failed to read configuration")?;

        if let Some(enabled) = self.enable {
            config.enabled = enabled;
        }
        if let Some((count, size)) = self.buffers {
            config.buffers = Buffers { count, size };
        }
        if let Some(max) = self.max_size {
            config.max_inflate_size = max;
        }
        if let Some(bits) = self.window_bits {
            config.window_bits = bits;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}
