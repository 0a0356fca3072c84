#![forbid(unsafe_code)]

use std::{collections::HashMap, time::Duration};

use url::Url;

/// Case-preserving header map exchanged with the origin.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Headers {
    inner: HashMap<String, String>,
}

impl Headers {
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner.get(key).map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<HashMap<String, String>> for Headers {
    fn from(map: HashMap<String, String>) -> Self {
        Self { inner: map }
    }
}

/// HTTP byte range, inclusive on both ends when bounded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeSpec {
    pub start: u64,
    pub end: Option<u64>,
}

impl RangeSpec {
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    pub fn from_start(start: u64) -> Self {
        Self { start, end: None }
    }

    pub fn to_header_value(&self) -> String {
        if let Some(end) = self.end {
            format!("bytes={}-{}", self.start, end)
        } else {
            format!("bytes={}-", self.start)
        }
    }
}

/// One range fetch as the coordinator plans it.
///
/// Wire semantics:
/// - method GET;
/// - `Range: bytes=offset-(offset+length-1)`, omitted when both `offset` and
///   `length` are zero (plain full-body request);
/// - `length == 0` with a nonzero offset means open-ended (`bytes=offset-`);
/// - `cachever > 0` appends a `buggy_cachever=<N>` query parameter so a
///   misbehaving range cache cannot replay a stale later range.
#[derive(Clone, Debug)]
pub struct FetchRequest {
    pub url: Url,
    pub offset: u64,
    pub length: u64,
    pub cachever: u64,
    /// Progressive backends emit chunks as they arrive; non-progressive ones
    /// aggregate the body and emit it once.
    pub progressive: bool,
    pub headers: Option<Headers>,
}

impl FetchRequest {
    /// Range header for this request, if one is needed.
    pub fn range_spec(&self) -> Option<RangeSpec> {
        if self.offset == 0 && self.length == 0 {
            return None;
        }
        let end = (self.length > 0).then(|| self.offset + self.length - 1);
        Some(RangeSpec::new(self.offset, end))
    }

    /// Request URL with the cache-buster applied.
    pub fn request_url(&self) -> Url {
        let mut url = self.url.clone();
        if self.cachever > 0 {
            url.query_pairs_mut()
                .append_pair("buggy_cachever", &self.cachever.to_string());
        }
        url
    }
}

/// Response metadata extracted from the status line and headers.
///
/// - `206` with `Content-Range: bytes S-E/T` → `seekable`, `length = T`
///   (`*` → unknown), `range_start = S`;
/// - other 2xx → `length = Content-Length` (absent/empty → unknown),
///   not seekable, no `range_start`.
#[derive(Clone, Debug)]
pub struct ResponseMeta {
    pub seekable: bool,
    pub length: Option<u64>,
    /// First byte position the origin actually served, when known. The
    /// coordinator compares this against the requested offset to detect a
    /// range cache serving a stale later range.
    pub range_start: Option<u64>,
    pub headers: Headers,
}

#[derive(Clone, Debug)]
pub struct NetOptions {
    pub request_timeout: Duration,
    pub pool_max_idle_per_host: usize,
}

impl Default for NetOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            pool_max_idle_per_host: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn req(offset: u64, length: u64, cachever: u64) -> FetchRequest {
        FetchRequest {
            url: Url::parse("http://example.com/file.bin").unwrap(),
            offset,
            length,
            cachever,
            progressive: true,
            headers: None,
        }
    }

    #[rstest]
    #[case(0, 0, None)]
    #[case(0, 1024, Some("bytes=0-1023"))]
    #[case(4096, 1024, Some("bytes=4096-5119"))]
    #[case(4096, 0, Some("bytes=4096-"))]
    fn range_header_wire_format(
        #[case] offset: u64,
        #[case] length: u64,
        #[case] expected: Option<&str>,
    ) {
        let spec = req(offset, length, 0).range_spec();
        assert_eq!(spec.map(|s| s.to_header_value()), expected.map(String::from));
    }

    #[test]
    fn cache_buster_only_when_nonzero() {
        assert_eq!(req(0, 16, 0).request_url().query(), None);
        assert_eq!(
            req(0, 16, 3).request_url().query(),
            Some("buggy_cachever=3")
        );
    }

    #[test]
    fn cache_buster_preserves_existing_query() {
        let mut r = req(0, 16, 2);
        r.url = Url::parse("http://example.com/file.bin?token=abc").unwrap();
        assert_eq!(
            r.request_url().query(),
            Some("token=abc&buggy_cachever=2")
        );
    }

    #[test]
    fn headers_round_trip() {
        let mut headers = Headers::new();
        headers.insert("Authorization", "Bearer token");
        assert_eq!(headers.get("Authorization"), Some("Bearer token"));
        assert!(!headers.is_empty());
    }
}
