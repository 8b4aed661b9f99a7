//! Filter configuration.
//!
//! The configuration is set up once and then shared by reference
//! between all requests. Values can be read from the environment:
//!
//! | variable                  | example  | default  |
//! |---------------------------|----------|----------|
//! | `DEGZIP_ENABLE`           | `on`     | `off`    |
//! | `DEGZIP_BUFFERS`          | `32 4k`  | `32 4k`  |
//! | `DEGZIP_MAX_INFLATE_SIZE` | `10m`    | `0`      |
//! | `DEGZIP_WINDOW_BITS`      | `15`     | `15`     |

use std::env;

use degzip_utils::directive::{self, DirectiveError};
use thiserror::Error;

use crate::{guard::SizeGuard, inflate::DEFAULT_WINDOW_BITS};

const DEGZIP_ENABLE: &str = "DEGZIP_ENABLE";
const DEGZIP_BUFFERS: &str = "DEGZIP_BUFFERS";
const DEGZIP_MAX_INFLATE_SIZE: &str = "DEGZIP_MAX_INFLATE_SIZE";
const DEGZIP_WINDOW_BITS: &str = "DEGZIP_WINDOW_BITS";

const PAGE_SIZE: usize = 4096;

/// Errors for invalid configuration values.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable holds a malformed value.
    #[error("invalid value in {var}: {source}")]
    Directive {
        var: &'static str,
        #[source]
        source: DirectiveError,
    },

    /// The window size is outside of what gzip supports.
    #[error("invalid window bits {0}; must be between 9 and 15")]
    BadWindowBits(u64),

    /// Inflation needs at least one buffer of at least one byte.
    #[error("output buffers must be non-empty and at least one must exist")]
    ZeroBuffers,
}

/// The pool of output buffers each request may use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Buffers {
    /// The maximum number of buffers.
    pub count: usize,
    /// The size of each buffer in bytes.
    pub size: usize,
}

impl Buffers {
    /// The combined capacity of all buffers.
    #[inline]
    pub fn total(&self) -> usize {
        self.count.saturating_mul(self.size)
    }
}

impl Default for Buffers {
    /// 128 KiB worth of page-sized buffers.
    fn default() -> Self {
        Self {
            count: (128 * 1024) / PAGE_SIZE,
            size: PAGE_SIZE,
        }
    }
}

/// Configuration of the gunzip filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct Config {
    /// Whether request bodies are inflated at all.
    pub enabled: bool,
    /// Output buffers per request.
    pub buffers: Buffers,
    /// The largest inflated body accepted, in bytes; `0` for no limit.
    pub max_inflate_size: u64,
    /// The base two logarithm of the decoder window size.
    pub window_bits: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: false,
            buffers: Buffers::default(),
            max_inflate_size: 0,
            window_bits: DEFAULT_WINDOW_BITS,
        }
    }
}

impl Config {
    /// Creates an enabled configuration with default values otherwise.
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Reads the configuration from `DEGZIP_*` environment variables.
    ///
    /// Variables which are not set keep their default values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Reads the configuration through a custom variable lookup.
    pub fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        fn bad(var: &'static str) -> impl FnOnce(DirectiveError) -> ConfigError {
            move |source| ConfigError::Directive { var, source }
        }

        let mut config = Self::default();

        if let Some(value) = lookup(DEGZIP_ENABLE) {
            config.enabled = directive::parse_flag(&value).map_err(bad(DEGZIP_ENABLE))?;
        }
        if let Some(value) = lookup(DEGZIP_BUFFERS) {
            let (count, size) =
                directive::parse_buffers(&value).map_err(bad(DEGZIP_BUFFERS))?;
            config.buffers = Buffers { count, size };
        }
        if let Some(value) = lookup(DEGZIP_MAX_INFLATE_SIZE) {
            config.max_inflate_size =
                directive::parse_size(&value).map_err(bad(DEGZIP_MAX_INFLATE_SIZE))?;
        }
        if let Some(value) = lookup(DEGZIP_WINDOW_BITS) {
            let bits = directive::parse_number(&value).map_err(bad(DEGZIP_WINDOW_BITS))?;
            config.window_bits =
                u8::try_from(bits).map_err(|_| ConfigError::BadWindowBits(bits))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values the filter cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffers.count == 0 || self.buffers.size == 0 {
            return Err(ConfigError::ZeroBuffers);
        }
        if !(9..=15).contains(&self.window_bits) {
            return Err(ConfigError::BadWindowBits(self.window_bits.into()));
        }

        Ok(())
    }

    /// Gets the size guard for this configuration.
    #[inline]
    pub fn guard(&self) -> SizeGuard {
        SizeGuard::new(self.max_inflate_size)
    }
}
