//! `siphon`
//!
//! Umbrella crate re-exporting the public surface of the siphon workspace:
//! open a URL as a [`RemoteStream`], discover its length and seekability,
//! then `seek`/`read`/`buffer` as against a local random-access file while
//! ranges are fetched on demand into a bounded sparse cache.
//!
//! ```no_run
//! use siphon::{RemoteStream, StreamOptions};
//!
//! # async fn demo() -> Result<(), siphon::StreamError> {
//! let url = "http://example.com/large.bin".parse().unwrap();
//! let mut stream = RemoteStream::new(StreamOptions::new(url));
//! stream.load().await?;
//! stream.seek(1024 * 1024).await?;
//! let bytes = stream.read(4096).await?;
//! # let _ = bytes;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub use siphon_cache::{Cache, CacheError, CacheResult, Segment, SegmentKind};
pub use siphon_net::{
    ByteStream, FetchBackend, FetchRequest, FetchResponse, Headers, HttpFetcher, NetError,
    NetOptions, NetResult, RangeSpec, ResponseMeta,
};
pub use siphon_stream::{
    AbortHandle, DEFAULT_CACHE_SIZE, DEFAULT_CHUNK_SIZE, RemoteStream, StreamError, StreamOptions,
    StreamResult,
};
