#![forbid(unsafe_code)]

//! `reqwest`-backed fetch backend.

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::Client;
use tracing::{debug, trace};

use crate::{
    error::{NetError, NetResult},
    fetcher::{ByteStream, FetchBackend, FetchResponse},
    types::{FetchRequest, Headers, NetOptions, ResponseMeta},
};

#[derive(Clone, Debug)]
pub struct HttpFetcher {
    inner: Client,
    options: NetOptions,
}

impl HttpFetcher {
    /// # Panics
    ///
    /// Panics if the underlying TLS backend cannot be initialized.
    #[must_use]
    pub fn new(options: NetOptions) -> Self {
        let inner = Client::builder()
            .pool_max_idle_per_host(options.pool_max_idle_per_host)
            .build()
            .expect("failed to build reqwest client");
        Self { inner, options }
    }

    fn apply_headers(
        mut req: reqwest::RequestBuilder,
        headers: Option<&Headers>,
    ) -> reqwest::RequestBuilder {
        if let Some(headers) = headers {
            for (k, v) in headers.iter() {
                req = req.header(k, v);
            }
        }
        req
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(NetOptions::default())
    }
}

#[async_trait]
impl FetchBackend for HttpFetcher {
    async fn fetch(&self, req: FetchRequest) -> NetResult<FetchResponse> {
        let url = req.request_url();
        let mut builder = self.inner.get(url.clone());
        builder = Self::apply_headers(builder, req.headers.as_ref());
        if let Some(range) = req.range_spec() {
            builder = builder.header("Range", range.to_header_value());
        }
        builder = builder.timeout(self.options.request_timeout);

        trace!(%url, offset = req.offset, length = req.length, "opening range request");
        let resp = builder.send().await.map_err(NetError::from)?;
        let status = resp.status();

        if !status.is_success() {
            return Err(NetError::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }

        let mut headers = Headers::new();
        for (name, value) in resp.headers().iter() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.as_str(), v);
            }
        }

        let meta = if status.as_u16() == 206 {
            let raw = headers
                .get("content-range")
                .ok_or_else(|| NetError::BadHeader {
                    header: "Content-Range",
                    value: String::new(),
                })?;
            let (start, _, total) = parse_content_range(raw)?;
            ResponseMeta {
                seekable: true,
                length: total,
                range_start: Some(start),
                headers,
            }
        } else {
            let length = headers
                .get("content-length")
                .filter(|v| !v.is_empty())
                .and_then(|v| v.parse::<u64>().ok());
            ResponseMeta {
                seekable: false,
                length,
                range_start: None,
                headers,
            }
        };

        debug!(
            status = status.as_u16(),
            seekable = meta.seekable,
            length = ?meta.length,
            "range request opened"
        );

        let body: ByteStream = if req.progressive {
            Box::pin(resp.bytes_stream().map_err(NetError::from))
        } else {
            // Non-progressive mode aggregates the body and emits it once.
            Box::pin(futures::stream::once(async move {
                resp.bytes().await.map_err(NetError::from)
            }))
        };

        Ok(FetchResponse { meta, body })
    }
}

/// Parse `Content-Range: bytes S-E/T` into `(S, E, total)`.
///
/// A total of `*` means the origin does not know the full length.
fn parse_content_range(value: &str) -> NetResult<(u64, u64, Option<u64>)> {
    let bad = || NetError::BadHeader {
        header: "Content-Range",
        value: value.to_string(),
    };

    let rest = value.trim().strip_prefix("bytes ").ok_or_else(bad)?;
    let (span, total) = rest.split_once('/').ok_or_else(bad)?;
    let (start, end) = span.split_once('-').ok_or_else(bad)?;

    let start: u64 = start.trim().parse().map_err(|_| bad())?;
    let end: u64 = end.trim().parse().map_err(|_| bad())?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().map_err(|_| bad())?),
    };

    if end < start || total.is_some_and(|t| end >= t) {
        return Err(bad());
    }
    Ok((start, end, total))
}
