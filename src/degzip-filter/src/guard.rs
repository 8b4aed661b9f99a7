//! Decompression bomb protection.

use thiserror::Error;

/// The decompressed body grew beyond the configured maximum.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("inflated body size {total} exceeds the maximum of {max} bytes")]
pub struct LimitExceeded {
    /// The number of bytes produced so far.
    pub total: u64,
    /// The configured maximum.
    pub max: u64,
}

/// Checks a running decompressed byte count against `max`.
///
/// A `max` of `0` disables the limit.
#[inline]
pub const fn check(total: u64, max: u64) -> Result<(), LimitExceeded> {
    if max == 0 || total <= max {
        Ok(())
    } else {
        Err(LimitExceeded { total, max })
    }
}

/// A size limit for the inflated representation of a body.
///
/// The guard is consulted after every inflate step which produced
/// output, at which point the bytes are already sitting in an output
/// buffer. Enforcement is therefore not exact: a body is detected as
/// oversized once it exceeds the maximum, by at most the capacity of
/// one output buffer (see [`SizeGuard::slack`]). Nothing beyond that
/// is ever produced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SizeGuard {
    max: u64,
}

impl SizeGuard {
    /// Creates a guard for the given maximum; `0` means unlimited.
    #[inline]
    pub const fn new(max: u64) -> Self {
        Self { max }
    }

    /// Creates a guard that accepts any size.
    #[inline]
    pub const fn unlimited() -> Self {
        Self::new(0)
    }

    /// Gets the configured maximum.
    #[inline]
    pub const fn max(&self) -> u64 {
        self.max
    }

    /// Whether any limit is enforced at all.
    #[inline]
    pub const fn is_limited(&self) -> bool {
        self.max != 0
    }

    /// The upper bound by which a body may overshoot the maximum
    /// before it is rejected, given the output buffer size.
    #[inline]
    pub const fn slack(&self, buffer_size: usize) -> u64 {
        if self.is_limited() {
            buffer_size as u64
        } else {
            0
        }
    }

    /// Checks `total` against the configured maximum.
    #[inline]
    pub const fn check(&self, total: u64) -> Result<(), LimitExceeded> {
        check(total, self.max)
    }
}
