//! HTTP fetcher tests against a local axum fixture server.

use axum::{
    Router,
    extract::Request,
    http::StatusCode,
    response::Response,
    routing::get,
};
use bytes::Bytes;
use futures::StreamExt;
use siphon_net::{FetchBackend, FetchRequest, HttpFetcher, NetError, NetOptions};
use tokio::net::TcpListener;
use url::Url;

const BODY: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

fn parse_range(header: &str, len: usize) -> Option<(usize, usize)> {
    let spec = header.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start: usize = start.parse().ok()?;
    let end: usize = if end.is_empty() {
        len - 1
    } else {
        end.parse().ok()?
    };
    (start <= end && end < len).then_some((start, end))
}

async fn file_endpoint(request: Request) -> Result<Response, StatusCode> {
    let range = request
        .headers()
        .get("Range")
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);

    match range {
        Some(header) => {
            let (start, end) =
                parse_range(&header, BODY.len()).ok_or(StatusCode::RANGE_NOT_SATISFIABLE)?;
            Ok(Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(
                    "Content-Range",
                    format!("bytes {start}-{end}/{}", BODY.len()),
                )
                .body(axum::body::Body::from(Bytes::copy_from_slice(
                    &BODY[start..=end],
                )))
                .unwrap())
        }
        None => Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Content-Length", BODY.len().to_string())
            .body(axum::body::Body::from(Bytes::from_static(BODY)))
            .unwrap()),
    }
}

async fn echo_query_endpoint(request: Request) -> Response {
    let query = request.uri().query().unwrap_or("").to_string();
    Response::builder()
        .status(StatusCode::OK)
        .body(axum::body::Body::from(query))
        .unwrap()
}

async fn missing_endpoint() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn run_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new()
        .route("/file", get(file_endpoint))
        .route("/query", get(echo_query_endpoint))
        .route("/missing", get(missing_endpoint));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://127.0.0.1:{}", addr.port())
}

fn request(url: Url, offset: u64, length: u64) -> FetchRequest {
    FetchRequest {
        url,
        offset,
        length,
        cachever: 0,
        progressive: true,
        headers: None,
    }
}

async fn collect(mut resp: siphon_net::FetchResponse) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = resp.body.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    out
}

#[tokio::test]
async fn partial_content_parses_meta_and_body() {
    let base = run_server().await;
    let url: Url = format!("{base}/file").parse().unwrap();
    let fetcher = HttpFetcher::new(NetOptions::default());

    let resp = fetcher.fetch(request(url, 5, 5)).await.unwrap();
    assert!(resp.meta.seekable);
    assert_eq!(resp.meta.length, Some(BODY.len() as u64));
    assert_eq!(resp.meta.range_start, Some(5));

    assert_eq!(collect(resp).await, b"56789");
}

#[tokio::test]
async fn full_body_is_not_seekable() {
    let base = run_server().await;
    let url: Url = format!("{base}/file").parse().unwrap();
    let fetcher = HttpFetcher::new(NetOptions::default());

    let resp = fetcher.fetch(request(url, 0, 0)).await.unwrap();
    assert!(!resp.meta.seekable);
    assert_eq!(resp.meta.length, Some(BODY.len() as u64));
    assert_eq!(resp.meta.range_start, None);

    assert_eq!(collect(resp).await, BODY);
}

#[tokio::test]
async fn non_progressive_aggregates_into_one_chunk() {
    let base = run_server().await;
    let url: Url = format!("{base}/file").parse().unwrap();
    let fetcher = HttpFetcher::new(NetOptions::default());

    let mut req = request(url, 0, 16);
    req.progressive = false;
    let mut resp = fetcher.fetch(req).await.unwrap();

    let first = resp.body.next().await.unwrap().unwrap();
    assert_eq!(&first[..], &BODY[..16]);
    assert!(resp.body.next().await.is_none());
}

#[tokio::test]
async fn cache_buster_reaches_the_wire() {
    let base = run_server().await;
    let url: Url = format!("{base}/query").parse().unwrap();
    let fetcher = HttpFetcher::new(NetOptions::default());

    let mut req = request(url, 0, 0);
    req.cachever = 7;
    let resp = fetcher.fetch(req).await.unwrap();
    assert_eq!(collect(resp).await, b"buggy_cachever=7");
}

#[tokio::test]
async fn http_error_status_is_surfaced() {
    let base = run_server().await;
    let url: Url = format!("{base}/missing").parse().unwrap();
    let fetcher = HttpFetcher::new(NetOptions::default());

    let err = fetcher.fetch(request(url, 0, 0)).await.unwrap_err();
    assert!(matches!(err, NetError::HttpStatus { status: 404, .. }));
}
