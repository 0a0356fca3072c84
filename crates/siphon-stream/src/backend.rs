#![forbid(unsafe_code)]

//! The single in-flight range transfer a stream owns.

use bytes::Bytes;
use futures::StreamExt;
use siphon_net::{ByteStream, NetResult};

/// One active range request `[offset, offset + length)`.
///
/// Bytes are pulled on demand; dropping the backend cancels the underlying
/// connection, so a superseded transfer can never deliver into the cache.
pub(crate) struct Backend {
    offset: u64,
    length: u64,
    bytes_read: u64,
    body: ByteStream,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("bytes_read", &self.bytes_read)
            .finish_non_exhaustive()
    }
}

impl Backend {
    pub(crate) fn new(offset: u64, length: u64, body: ByteStream) -> Self {
        Self {
            offset,
            length,
            bytes_read: 0,
            body,
        }
    }

    /// Pull the next body chunk; `None` means the response ended.
    pub(crate) async fn next_chunk(&mut self) -> Option<NetResult<Bytes>> {
        let item = self.body.next().await;
        if let Some(Ok(chunk)) = &item {
            self.bytes_read += chunk.len() as u64;
        }
        item
    }

    pub(crate) fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Absolute position one past the last byte received.
    pub(crate) fn end_offset(&self) -> u64 {
        self.offset + self.bytes_read
    }
}
