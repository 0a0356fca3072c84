#![forbid(unsafe_code)]

use reqwest::Error as ReqwestError;
use thiserror::Error;
use url::Url;

pub type NetResult<T> = Result<T, NetError>;

/// Centralized error type for `siphon-net`.
#[derive(Debug, Error, Clone)]
pub enum NetError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("HTTP {status} for URL: {url}")]
    HttpStatus { status: u16, url: Url },

    #[error("malformed {header} header: {value:?}")]
    BadHeader {
        header: &'static str,
        value: String,
    },

    #[error("timeout")]
    Timeout,

    #[error("cancelled")]
    Cancelled,
}

impl From<ReqwestError> for NetError {
    fn from(e: ReqwestError) -> Self {
        if e.is_timeout() {
            return Self::Timeout;
        }
        // Alternate formatting {:#} includes the full error chain
        // (e.g. "error sending request … : connection refused").
        Self::Http(format!("{e:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_status_and_url() {
        let err = NetError::HttpStatus {
            status: 404,
            url: Url::parse("http://example.com/file").unwrap(),
        };
        let msg = err.to_string();
        assert!(msg.contains("404"));
        assert!(msg.contains("example.com"));
    }

    #[test]
    fn bad_header_names_the_header() {
        let err = NetError::BadHeader {
            header: "Content-Range",
            value: "bytes garbage".to_string(),
        };
        assert!(err.to_string().contains("Content-Range"));
    }
}
