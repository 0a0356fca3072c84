#![forbid(unsafe_code)]

use siphon_net::{Headers, NetOptions};
use url::Url;

/// Default fetch/readahead chunk: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Default cache cap: 32 MiB. Zero disables eviction entirely.
pub const DEFAULT_CACHE_SIZE: u64 = 32 * 1024 * 1024;

/// Configuration for a [`RemoteStream`](crate::RemoteStream).
#[derive(Clone, Debug)]
pub struct StreamOptions {
    /// Resource to stream.
    pub url: Url,
    /// Size of one range request, and the eviction-protected window around
    /// the read position.
    pub chunk_size: u64,
    /// Soft cap on cached bytes; 0 means unbounded.
    pub cache_size: u64,
    /// Emit chunks as they arrive instead of aggregating whole responses.
    pub progressive: bool,
    /// Open the next range request eagerly after reads and seeks.
    pub read_ahead: bool,
    /// Extra request headers sent with every fetch.
    pub headers: Option<Headers>,
    /// Network configuration.
    pub net: NetOptions,
}

impl StreamOptions {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            chunk_size: DEFAULT_CHUNK_SIZE,
            cache_size: DEFAULT_CACHE_SIZE,
            progressive: true,
            read_ahead: true,
            headers: None,
            net: NetOptions::default(),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_cache_size(mut self, cache_size: u64) -> Self {
        self.cache_size = cache_size;
        self
    }

    pub fn with_progressive(mut self, progressive: bool) -> Self {
        self.progressive = progressive;
        self
    }

    pub fn with_read_ahead(mut self, read_ahead: bool) -> Self {
        self.read_ahead = read_ahead;
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn with_net(mut self, net: NetOptions) -> Self {
        self.net = net;
        self
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn url() -> Url {
        Url::parse("http://example.com/file.bin").unwrap()
    }

    #[test]
    fn defaults() {
        let opts = StreamOptions::new(url());
        assert_eq!(opts.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(opts.cache_size, DEFAULT_CACHE_SIZE);
        assert!(opts.progressive);
        assert!(opts.read_ahead);
        assert!(opts.headers.is_none());
    }

    #[rstest]
    #[case(4096)]
    #[case(1024 * 1024)]
    fn builder_chain(#[case] chunk: u64) {
        let opts = StreamOptions::new(url())
            .with_chunk_size(chunk)
            .with_cache_size(0)
            .with_progressive(false)
            .with_read_ahead(false);
        assert_eq!(opts.chunk_size, chunk);
        assert_eq!(opts.cache_size, 0);
        assert!(!opts.progressive);
        assert!(!opts.read_ahead);
    }
}
