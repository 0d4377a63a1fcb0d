//! A byte source with a memo of every span fetched so far.

use super::{ByteRange, ByteSource};
use crate::{Error, Result};
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Requests larger than this are refused outright.
pub const MAX_REQUEST_BYTES: u64 = 50_000_000;

#[derive(Debug, Clone)]
struct CachedSpan {
    start: u64,
    data: Bytes,
}

impl CachedSpan {
    /// Inclusive last offset; only meaningful for non-empty spans.
    fn stop(&self) -> u64 {
        self.start + self.data.len() as u64 - 1
    }
}

#[derive(Debug, Default)]
struct CacheState {
    spans: Vec<CachedSpan>,
    file_length: Option<u64>,
}

/// Random-access reader over a [`ByteSource`].
///
/// Every fetched span is kept as an immutable [`Bytes`] buffer. A request
/// that lies entirely inside a cached span is answered with a zero-copy
/// slice; anything else goes to the source. Partial overlaps are not
/// stitched together.
pub struct RangeFile {
    source: Arc<dyn ByteSource>,
    state: Mutex<CacheState>,
    network_requests: AtomicUsize,
    max_request: u64,
}

impl RangeFile {
    pub fn new(source: Arc<dyn ByteSource>) -> Self {
        Self {
            source,
            state: Mutex::new(CacheState::default()),
            network_requests: AtomicUsize::new(0),
            max_request: MAX_REQUEST_BYTES,
        }
    }

    /// Refuse reads, whole-file reads included, larger than `bytes`.
    pub fn with_max_request_bytes(mut self, bytes: u64) -> Self {
        self.max_request = bytes.max(1);
        self
    }

    pub fn location(&self) -> &str {
        self.source.location()
    }

    /// Number of reads that went to the underlying source.
    pub fn num_network_requests(&self) -> usize {
        self.network_requests.load(Ordering::Relaxed)
    }

    /// Drop all cached spans. The learned file length is kept.
    pub fn clear_cache(&self) {
        self.lock().spans.clear();
    }

    /// Fetch `length` bytes starting at `start`. The result is shorter than
    /// `length` when the file ends first.
    pub async fn get_bytes(&self, start: u64, length: u64) -> Result<Bytes> {
        if length == 0 {
            return Ok(Bytes::new());
        }
        let mut stop = start + length - 1;
        if let Some(file_length) = self.lock().file_length {
            if start >= file_length {
                return Ok(Bytes::new());
            }
            stop = stop.min(file_length - 1);
        }

        if let Some(hit) = self.from_cache(start, stop) {
            return Ok(hit);
        }
        self.from_network(start, stop).await
    }

    /// Read the entire file. Files larger than the request limit are refused
    /// after reading at most one byte past the limit.
    pub async fn get_all(&self) -> Result<Bytes> {
        let known = self.lock().file_length;
        if let Some(file_length) = known {
            if file_length == 0 {
                return Ok(Bytes::new());
            }
            self.check_request_size(file_length)?;
            if let Some(hit) = self.from_cache(0, file_length - 1) {
                return Ok(hit);
            }
        }

        self.network_requests.fetch_add(1, Ordering::Relaxed);
        debug!(location = self.location(), "fetching whole file");
        let fetched = self.source.read_range(ByteRange::new(0, self.max_request)).await?;
        let data = fetched.bytes;
        if let Some(total) = fetched.total_size {
            self.lock().file_length = Some(total);
            self.check_request_size(total)?;
        }
        self.check_request_size(data.len() as u64)?;

        let mut state = self.lock();
        state.file_length = Some(data.len() as u64);
        state.spans = vec![CachedSpan {
            start: 0,
            data: data.clone(),
        }];
        Ok(data)
    }

    /// Total file size, asking the source only if it hasn't been learned yet.
    pub async fn size(&self) -> Result<u64> {
        if let Some(file_length) = self.lock().file_length {
            return Ok(file_length);
        }
        let size = self.source.size().await?;
        self.lock().file_length = Some(size);
        Ok(size)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn from_cache(&self, start: u64, stop: u64) -> Option<Bytes> {
        let state = self.lock();
        state
            .spans
            .iter()
            .filter(|span| !span.data.is_empty())
            .find(|span| span.start <= start && span.stop() >= stop)
            .map(|span| {
                let from = (start - span.start) as usize;
                let to = (stop - span.start) as usize + 1;
                span.data.slice(from..to)
            })
    }

    fn check_request_size(&self, length: u64) -> Result<()> {
        if length > self.max_request {
            return Err(Error::InvalidRange(format!(
                "monster request: won't fetch {} bytes from {}",
                length,
                self.location()
            )));
        }
        Ok(())
    }

    async fn from_network(&self, start: u64, stop: u64) -> Result<Bytes> {
        self.check_request_size(stop - start + 1)?;

        self.network_requests.fetch_add(1, Ordering::Relaxed);
        debug!(location = self.location(), start, stop, "fetching byte range");
        let fetched = self.source.read_range(ByteRange::new(start, stop)).await?;

        let mut state = self.lock();
        if !fetched.bytes.is_empty() {
            state.spans.push(CachedSpan {
                start,
                data: fetched.bytes.clone(),
            });
        }
        if let Some(size) = fetched.total_size {
            match state.file_length {
                Some(known) if known != size => {
                    warn!(
                        location = self.location(),
                        from = known,
                        to = size,
                        "size of remote file changed"
                    );
                }
                _ => state.file_length = Some(size),
            }
        }
        Ok(fetched.bytes)
    }
}
