#![forbid(unsafe_code)]

//! Stream coordinator.
//!
//! [`RemoteStream`] couples the segment cache to at most one in-flight range
//! request. All state lives behind `&mut self` and every operation is a
//! single cooperative task: the only suspension points are opening a fetch
//! and pulling its body. A superseded backend is simply dropped, which
//! cancels the connection and discards undelivered chunks, so stale data can
//! never reach the cache.

use std::{ops::Range, sync::Arc};

use bytes::Bytes;
use siphon_cache::Cache;
use siphon_net::{
    FetchBackend, FetchRequest, Headers, HttpFetcher, NetError, ResponseMeta,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    backend::Backend,
    error::{StreamError, StreamResult},
    options::StreamOptions,
};

/// Attempts against an origin cache that keeps serving stale ranges before
/// the anomaly is surfaced as a network error.
const WRONG_RANGE_RETRIES: u32 = 4;

/// Mutually exclusive operation phase. The public `loading`/`seeking`/
/// `buffering` booleans are derived views of this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Loading,
    Seeking,
    Buffering,
}

/// Cancels operations in flight on the stream that produced it.
///
/// Cloneable and usable from other tasks. Cancelling makes the pending
/// operation reject with [`StreamError::Aborted`] at its next suspension
/// point; the stream clears its phase before the rejection is observable.
/// Handles are one-shot: after an abort, acquire a fresh one.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    token: CancellationToken,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.token.cancel();
    }
}

/// Seekable, asynchronously buffered byte stream over a remote HTTP resource.
///
/// Consumers `load()` once to discover length and seekability, then issue
/// `seek`/`read`/`buffer` as against a local random-access file. Data is
/// fetched in `chunk_size` ranges, kept in a sparse segment cache bounded by
/// `cache_size`, and served on demand.
pub struct RemoteStream<F: FetchBackend = HttpFetcher> {
    opts: StreamOptions,
    fetcher: Arc<F>,
    cache: Cache,
    phase: Phase,
    loaded: bool,
    closed: bool,
    seekable: bool,
    length: Option<u64>,
    headers: Headers,
    /// Cache-buster counter, bumped whenever the origin serves a stale range.
    cachever: u64,
    backend: Option<Backend>,
    cancel: CancellationToken,
}

impl RemoteStream<HttpFetcher> {
    #[must_use]
    pub fn new(opts: StreamOptions) -> Self {
        let fetcher = HttpFetcher::new(opts.net.clone());
        Self::with_fetcher(opts, fetcher)
    }
}

impl<F: FetchBackend> RemoteStream<F> {
    pub fn with_fetcher(mut opts: StreamOptions, fetcher: F) -> Self {
        opts.chunk_size = opts.chunk_size.max(1);
        let cache = Cache::new(opts.chunk_size, opts.cache_size);
        Self {
            opts,
            fetcher: Arc::new(fetcher),
            cache,
            phase: Phase::Idle,
            loaded: false,
            closed: false,
            seekable: false,
            length: None,
            headers: Headers::new(),
            cachever: 0,
            backend: None,
            cancel: CancellationToken::new(),
        }
    }

    // Observable state.

    pub fn url(&self) -> &url::Url {
        &self.opts.url
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Total resource length, once known.
    pub fn length(&self) -> Option<u64> {
        self.length
    }

    /// Current read position.
    pub fn offset(&self) -> u64 {
        self.cache.read_offset()
    }

    pub fn eof(&self) -> bool {
        self.length == Some(self.cache.read_offset())
    }

    pub fn loaded(&self) -> bool {
        self.loaded
    }

    pub fn loading(&self) -> bool {
        self.phase == Phase::Loading
    }

    pub fn seeking(&self) -> bool {
        self.phase == Phase::Seeking
    }

    pub fn buffering(&self) -> bool {
        self.phase == Phase::Buffering
    }

    pub fn seekable(&self) -> bool {
        self.seekable
    }

    pub fn cachever(&self) -> u64 {
        self.cachever
    }

    /// Contiguous bytes available at the current position, capped by `max`.
    pub fn bytes_available(&self, max: u64) -> u64 {
        self.cache.bytes_readable(max)
    }

    /// Cached intervals as sorted, disjoint `[start, end)` pairs.
    pub fn buffered_ranges(&self) -> Vec<Range<u64>> {
        self.cache.ranges()
    }

    /// Handle for aborting operations in flight on this stream.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            token: self.cancel.clone(),
        }
    }

    // Operations.

    /// Open the stream: issue the first range request and learn length,
    /// seekability and response headers from it.
    pub async fn load(&mut self) -> StreamResult<()> {
        self.ensure_usable()?;
        if self.loaded {
            return Err(StreamError::InvalidState("load on an already loaded stream"));
        }
        if self.phase != Phase::Idle {
            return Err(StreamError::InvalidState("load during an active operation"));
        }

        self.phase = Phase::Loading;
        match self.open_backend().await {
            Ok(_) => {
                self.phase = Phase::Idle;
                self.loaded = true;
                debug!(
                    url = %self.opts.url,
                    length = ?self.length,
                    seekable = self.seekable,
                    "stream loaded"
                );
                Ok(())
            }
            Err(e) => self.fail_phase(e),
        }
    }

    /// Move the read position. Valid offsets are `0..=length`; seeking to
    /// exactly `length` positions at EOF with zero bytes available.
    pub async fn seek(&mut self, offset: u64) -> StreamResult<()> {
        self.ensure_usable()?;
        if !self.loaded {
            return Err(StreamError::InvalidState("seek before load"));
        }
        if self.phase != Phase::Idle {
            return Err(StreamError::InvalidState("seek during an active operation"));
        }
        if !self.seekable {
            return Err(StreamError::NotSeekable);
        }
        if let Some(len) = self.length
            && offset > len
        {
            return Err(StreamError::InvalidInput(format!(
                "seek to {offset} past end of stream ({len})"
            )));
        }

        self.phase = Phase::Seeking;
        // The current transfer is for the old position; drop it.
        self.backend = None;
        match self.reposition(offset).await {
            Ok(()) => {
                self.phase = Phase::Idle;
                Ok(())
            }
            Err(e) => self.fail_phase(e),
        }
    }

    /// Make up to `n` bytes from the current position available, fetching as
    /// needed. Returns how many bytes are now readable in that span, capped
    /// by EOF.
    pub async fn buffer(&mut self, n: u64) -> StreamResult<u64> {
        self.ensure_usable()?;
        if !self.loaded {
            return Err(StreamError::InvalidState("buffer before load"));
        }
        if self.phase != Phase::Idle {
            return Err(StreamError::InvalidState(
                "buffer during an active operation",
            ));
        }

        let start = self.cache.read_offset();
        let end = self.clamp_end(start.saturating_add(n));
        let want = end.saturating_sub(start);
        if want == 0 {
            return Ok(0);
        }
        if self.cache.bytes_readable(want) >= want {
            return Ok(want);
        }

        self.phase = Phase::Buffering;
        match self.buffer_to(end).await {
            Ok(()) => {
                self.phase = Phase::Idle;
                let end = self.clamp_end(start.saturating_add(n));
                Ok(self.cache.bytes_readable(end.saturating_sub(start)))
            }
            Err(e) => self.fail_phase(e),
        }
    }

    /// Buffer then drain: waits for up to `n` bytes and returns what arrived.
    /// An empty result means EOF.
    pub async fn read(&mut self, n: u64) -> StreamResult<Bytes> {
        self.buffer(n).await?;
        let out = self.read_sync(n)?;
        self.readahead().await?;
        Ok(out)
    }

    /// Drain up to `n` already-cached bytes without waiting.
    pub fn read_sync(&mut self, n: u64) -> StreamResult<Bytes> {
        self.ensure_usable()?;
        if !self.loaded {
            return Err(StreamError::InvalidState("read before load"));
        }
        if self.phase != Phase::Idle {
            return Err(StreamError::InvalidState("read during an active operation"));
        }

        let want = self.cache.bytes_readable(n);
        #[expect(clippy::cast_possible_truncation)] // capped by n
        let mut buf = vec![0u8; want as usize];
        let got = self.cache.read_bytes(&mut buf);
        buf.truncate(got);
        trace!(bytes = got, offset = self.cache.read_offset(), "drained");
        Ok(Bytes::from(buf))
    }

    /// Copy already-cached bytes into `dest`, advancing the read position.
    pub fn read_bytes(&mut self, dest: &mut [u8]) -> StreamResult<u64> {
        self.ensure_usable()?;
        if !self.loaded {
            return Err(StreamError::InvalidState("read before load"));
        }
        if self.phase != Phase::Idle {
            return Err(StreamError::InvalidState("read during an active operation"));
        }
        Ok(self.cache.read_bytes(dest) as u64)
    }

    /// Cancel whatever is in flight. Synchronous and idempotent: the phase is
    /// cleared, the transfer is dropped, and any pending operation rejects
    /// with [`StreamError::Aborted`].
    pub fn abort(&mut self) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.backend = None;
        self.phase = Phase::Idle;
        debug!("stream aborted");
    }

    /// Abort and make every further operation fail `InvalidState`.
    pub fn close(&mut self) {
        self.abort();
        self.closed = true;
    }

    // Internals.

    /// Open the next range request, if there is anything left to fetch.
    ///
    /// Positions the write cursor at the end of the contiguous readable run,
    /// so the fetch extends what the reader is about to consume. Returns
    /// `false` when no request is needed because the run already reaches EOF.
    async fn open_backend(&mut self) -> StreamResult<bool> {
        // The write position is the end of the whole contiguous readable run,
        // not just one chunk of it: a buffer spanning several backends must
        // keep extending the frontier. Only the fetch length is chunk-capped.
        let readable = self.cache.bytes_readable(u64::MAX);
        let read_tail = self.cache.read_offset() + readable;
        self.cache.seek_write(read_tail)?;

        if let Some(len) = self.length
            && read_tail >= len
        {
            return Ok(false);
        }
        let mut writable = self.cache.bytes_writable(self.opts.chunk_size);
        if let Some(len) = self.length {
            writable = writable.min(len.saturating_sub(self.cache.write_offset()));
        }
        if writable == 0 {
            return Ok(false);
        }

        let offset = self.cache.write_offset();
        for _ in 0..WRONG_RANGE_RETRIES {
            let req = FetchRequest {
                url: self.opts.url.clone(),
                offset,
                length: writable,
                cachever: self.cachever,
                progressive: self.opts.progressive,
                headers: self.opts.headers.clone(),
            };
            let fetcher = Arc::clone(&self.fetcher);
            let cancel = self.cancel.clone();
            let resp = tokio::select! {
                () = cancel.cancelled() => return self.aborted(),
                resp = fetcher.fetch(req) => resp.map_err(StreamError::Network)?,
            };

            // A broken range cache may replay a stale later range after a
            // rewind. Bust it with a fresh query parameter and try again.
            if let Some(start) = resp.meta.range_start
                && start != offset
            {
                self.cachever += 1;
                warn!(
                    requested = offset,
                    received = start,
                    cachever = self.cachever,
                    "stale range from origin cache, retrying with cache buster"
                );
                continue;
            }

            self.apply_meta(resp.meta);
            debug!(offset, length = writable, "backend opened");
            self.backend = Some(Backend::new(offset, writable, resp.body));
            return Ok(true);
        }

        Err(StreamError::Network(NetError::Http(
            "origin kept serving a stale byte range".to_string(),
        )))
    }

    /// Fetch until `target` is covered, the file ends, or nothing more can be
    /// requested. Reopens backends as their ranges run out.
    async fn buffer_to(&mut self, target: u64) -> StreamResult<()> {
        loop {
            let end = self.clamp_end(target);
            if self.covered(end) {
                return Ok(());
            }
            if self.backend.is_none() && !self.open_backend().await? {
                // Nothing left to fetch; resolve with what exists.
                return Ok(());
            }
            self.drive_backend(end).await?;
        }
    }

    /// Pull chunks from the current backend into the cache until `end` is
    /// covered or the response runs out.
    async fn drive_backend(&mut self, end: u64) -> StreamResult<()> {
        let Some(mut backend) = self.backend.take() else {
            return Ok(());
        };
        loop {
            if self.covered(end) {
                self.backend = Some(backend);
                return Ok(());
            }
            let cancel = self.cancel.clone();
            let item = tokio::select! {
                () = cancel.cancelled() => return self.aborted(),
                item = backend.next_chunk() => item,
            };
            match item {
                Some(Ok(chunk)) => {
                    trace!(bytes = chunk.len(), "chunk received");
                    self.cache.write(&chunk)?;
                }
                Some(Err(e)) => return Err(StreamError::Network(e)),
                None => {
                    if self.length.is_none() {
                        // Non-seekable origins reveal their length only by
                        // ending the response.
                        self.length = Some(backend.end_offset());
                        debug!(length = backend.end_offset(), "length learned at stream end");
                    } else if backend.bytes_read() == 0 {
                        return Err(StreamError::Network(NetError::Http(
                            "origin returned an empty range response".to_string(),
                        )));
                    }
                    return Ok(());
                }
            }
        }
    }

    async fn reposition(&mut self, offset: u64) -> StreamResult<()> {
        self.cache.seek_read(offset)?;
        self.cache.seek_write(offset)?;
        trace!(offset, "repositioned");
        self.readahead().await
    }

    /// Best-effort: start the next transfer early so the cache stays ahead of
    /// the reader. Network failures are logged, not surfaced; aborts are.
    async fn readahead(&mut self) -> StreamResult<()> {
        if !self.opts.read_ahead || self.backend.is_some() || self.eof() {
            return Ok(());
        }
        match self.open_backend().await {
            Ok(_) => Ok(()),
            Err(e) if e.is_aborted() => Err(e),
            Err(e) => {
                debug!(error = %e, "readahead fetch failed");
                Ok(())
            }
        }
    }

    fn apply_meta(&mut self, meta: ResponseMeta) {
        self.seekable = meta.seekable;
        if self.length.is_none() {
            self.length = meta.length;
        }
        if !self.loaded {
            self.headers = meta.headers;
        }
    }

    fn covered(&self, end: u64) -> bool {
        let start = self.cache.read_offset();
        end <= start || self.cache.bytes_readable(end - start) >= end - start
    }

    fn clamp_end(&self, end: u64) -> u64 {
        match self.length {
            Some(len) => end.min(len),
            None => end,
        }
    }

    fn ensure_usable(&self) -> StreamResult<()> {
        if self.closed {
            return Err(StreamError::InvalidState("stream is closed"));
        }
        Ok(())
    }

    /// Cancellation observed mid-operation: drop the transfer, clear the
    /// phase, re-arm the token if `abort()` has not already done so.
    fn aborted<T>(&mut self) -> StreamResult<T> {
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        self.backend = None;
        self.phase = Phase::Idle;
        Err(StreamError::Aborted)
    }

    /// Clear the phase and reject. `Aborted` is the carve-out: the flags were
    /// already cleared at the cancellation point and must not be touched
    /// again (an `abort()` may have started a new operation since).
    fn fail_phase<T>(&mut self, e: StreamError) -> StreamResult<T> {
        if !e.is_aborted() {
            self.phase = Phase::Idle;
        }
        Err(e)
    }
}

impl<F: FetchBackend> std::fmt::Debug for RemoteStream<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStream")
            .field("url", &self.opts.url.as_str())
            .field("phase", &self.phase)
            .field("loaded", &self.loaded)
            .field("seekable", &self.seekable)
            .field("length", &self.length)
            .field("offset", &self.cache.read_offset())
            .finish_non_exhaustive()
    }
}
