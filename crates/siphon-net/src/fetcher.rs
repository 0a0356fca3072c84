#![forbid(unsafe_code)]

//! Abstract range-fetch backend.
//!
//! One `fetch()` call corresponds to one in-flight HTTP GET for a byte range.
//! The event surface of the contract maps onto plain Rust constructs: a
//! resolved `fetch()` is the *open* event (headers parsed into
//! [`ResponseMeta`]), each body item is a *buffer* event, stream end is
//! *done*, and an `Err` item is *error*. The caller owns the response; the
//! backend holds no reference back, and dropping the body cancels the
//! transfer.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use crate::{
    error::NetResult,
    types::{FetchRequest, ResponseMeta},
};

/// Chunked response body.
pub type ByteStream = Pin<Box<dyn Stream<Item = NetResult<Bytes>> + Send + 'static>>;

/// An opened range response: parsed metadata plus the body.
pub struct FetchResponse {
    pub meta: ResponseMeta,
    pub body: ByteStream,
}

impl std::fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchResponse")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

/// Range-fetcher contract consumed by the stream coordinator.
///
/// Implementations must resolve only after response headers are available,
/// so the caller can inspect [`ResponseMeta`] before any payload arrives.
#[async_trait]
pub trait FetchBackend: Send + Sync + 'static {
    async fn fetch(&self, req: FetchRequest) -> NetResult<FetchResponse>;
}
