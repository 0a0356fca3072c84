#![forbid(unsafe_code)]

use siphon_cache::CacheError;
use siphon_net::NetError;
use thiserror::Error;

pub type StreamResult<T> = Result<T, StreamError>;

/// Errors produced by `siphon-stream`.
///
/// Notes:
/// - `InvalidState`/`InvalidInput`/`NotSeekable` are raised synchronously at
///   call time, before any phase transition.
/// - `Network` propagates through the pending operation once a transfer is
///   under way.
/// - `Aborted` is the stable cancellation kind; callers match on it (or use
///   [`StreamError::is_aborted`]) to tell a deliberate abort from a failure.
/// - `Cache` wraps defensive cache invariant errors and should never surface
///   from a correct build.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("stream is not seekable")]
    NotSeekable,

    #[error("network error: {0}")]
    Network(#[from] NetError),

    #[error("operation aborted")]
    Aborted,

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

impl StreamError {
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}
