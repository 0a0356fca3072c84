#![forbid(unsafe_code)]

use thiserror::Error;

/// Result type used by `siphon-cache`.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors produced by the segment cache.
///
/// Notes:
/// - `OutOfRange` is defensive: the terminator contains every offset at or
///   past its start, so a seek can only miss if the chain is corrupted.
/// - `Invariant` never surfaces from a correct build; it exists so internal
///   chain surgery can fail loudly instead of corrupting the partition.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("offset {offset} is outside the cached range")]
    OutOfRange { offset: u64 },

    #[error("write of {len} bytes at {offset} does not fit the available hole")]
    NoSpace { offset: u64, len: usize },

    #[error("segment list invariant violated: {0}")]
    Invariant(String),
}

impl CacheError {
    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }
}
