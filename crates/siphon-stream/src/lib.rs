//! `siphon-stream`
//!
//! Seekable, asynchronously buffered byte streams over remote HTTP
//! resources.
//!
//! [`RemoteStream`] is the public facade: it owns a sparse segment cache and
//! at most one in-flight range request, decides when to open a new request,
//! when to resolve a pending `buffer`, and how to recover from an origin
//! cache that replays stale ranges. See `siphon-cache` for the cache itself
//! and `siphon-net` for the fetch backend contract.

#![forbid(unsafe_code)]

mod backend;
mod error;
mod options;
mod stream;

pub use error::{StreamError, StreamResult};
pub use options::{DEFAULT_CACHE_SIZE, DEFAULT_CHUNK_SIZE, StreamOptions};
pub use stream::{AbortHandle, RemoteStream};
