//! Parsers for configuration values in server directive syntax.
//!
//! Values follow the conventions operators already know from web
//! server configuration files:
//!
//! - numbers are plain decimal digits;
//! - sizes are plain byte counts with an optional `k`, `m` or `g`
//!   suffix (case-insensitive), e.g. `512`, `4k`, `10M`;
//! - flags are `on` or `off`;
//! - buffer specifications are a count followed by a size, e.g.
//!   `32 4k`.

use thiserror::Error;

/// Errors produced when a directive value cannot be parsed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DirectiveError {
    /// A number was malformed or does not fit into 64 bits.
    #[error("invalid number '{0}'")]
    BadNumber(String),

    /// A size value was malformed or does not fit into 64 bits.
    #[error("invalid size '{0}'")]
    BadSize(String),

    /// A flag value was neither `on` nor `off`.
    #[error("invalid flag '{0}'; must be \"on\" or \"off\"")]
    BadFlag(String),

    /// A buffer specification did not consist of a count and a size.
    #[error("invalid buffers '{0}'; expected \"<number> <size>\"")]
    BadBuffers(String),
}

/// Parses a plain decimal number without any unit.
pub fn parse_number(value: &str) -> Result<u64, DirectiveError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DirectiveError::BadNumber(value.to_owned()));
    }

    trimmed
        .parse()
        .map_err(|_| DirectiveError::BadNumber(value.to_owned()))
}

/// Parses a size value with an optional unit suffix into bytes.
pub fn parse_size(value: &str) -> Result<u64, DirectiveError> {
    let bad = || DirectiveError::BadSize(value.to_owned());

    let trimmed = value.trim();
    let (digits, scale) = match trimmed.as_bytes().last() {
        Some(b'k' | b'K') => (&trimmed[..trimmed.len() - 1], 1 << 10),
        Some(b'm' | b'M') => (&trimmed[..trimmed.len() - 1], 1 << 20),
        Some(b'g' | b'G') => (&trimmed[..trimmed.len() - 1], 1 << 30),
        _ => (trimmed, 1),
    };

    // `u64::from_str` would also accept a leading `+`.
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }

    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(scale))
        .ok_or_else(bad)
}

/// Parses an `on`/`off` flag value.
pub fn parse_flag(value: &str) -> Result<bool, DirectiveError> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("on") {
        Ok(true)
    } else if trimmed.eq_ignore_ascii_case("off") {
        Ok(false)
    } else {
        Err(DirectiveError::BadFlag(value.to_owned()))
    }
}

/// Parses a `<number> <size>` buffer specification into the number
/// of buffers and the byte size of each.
pub fn parse_buffers(value: &str) -> Result<(usize, usize), DirectiveError> {
    let bad = || DirectiveError::BadBuffers(value.to_owned());

    let mut parts = value.split_whitespace();
    let (Some(count), Some(size), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(bad());
    };

    let count = parse_number(count).map_err(|_| bad())?;
    let size = parse_size(size).map_err(|_| bad())?;

    Ok((
        usize::try_from(count).map_err(|_| bad())?,
        usize::try_from(size).map_err(|_| bad())?,
    ))
}
