//! `siphon-net`
//!
//! HTTP range-fetch backend for siphon streams: the [`FetchBackend`] contract
//! the coordinator drives, wire types for range requests and parsed response
//! metadata, and the default [`HttpFetcher`] built on `reqwest`.

#![forbid(unsafe_code)]

mod error;
mod fetcher;
mod http;
mod types;

pub use error::{NetError, NetResult};
pub use fetcher::{ByteStream, FetchBackend, FetchResponse};
pub use http::HttpFetcher;
pub use types::{FetchRequest, Headers, NetOptions, RangeSpec, ResponseMeta};
