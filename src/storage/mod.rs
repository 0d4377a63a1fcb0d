//! Byte sources for genomic data files.
//!
//! This module provides a trait-based abstraction for reading byte ranges
//! from a file, allowing different backends (local filesystem, HTTP,
//! in-memory buffers) to be used interchangeably by the codecs.
//!
//! # Implementations
//!
//! - [`LocalStorage`] - Local filesystem
//! - [`HttpStorage`] - HTTP/HTTPS with Range requests (feature `http`)
//! - [`MemoryStorage`] - An in-memory buffer
//!
//! Codecs never talk to a [`ByteSource`] directly; they go through a
//! [`RangeFile`], which memoizes fetched spans.
//!
//! # Example
//!
//! ```no_run
//! use pileup::storage::{self, RangeFile};
//!
//! # async fn run() -> pileup::Result<()> {
//! let file = RangeFile::new(storage::open("./data/hg19.2bit")?);
//! let header = file.get_bytes(0, 16384).await?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "http")]
mod http;
mod local;
mod memory;
mod range_file;

#[cfg(feature = "http")]
pub use http::HttpStorage;
pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use range_file::{MAX_REQUEST_BYTES, RangeFile};

use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;

/// Byte range within a file. `end` is inclusive, as in an HTTP Range header;
/// `None` reads to the end of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub fn to_end(start: u64) -> Self {
        Self { start, end: None }
    }

    pub fn header_value(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        }
    }
}

/// Bytes returned by a source, plus the total file size when the source
/// reports it.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub bytes: Bytes,
    pub total_size: Option<u64>,
}

/// A readable resource addressed by byte offsets.
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Human-readable location, used in logs and error messages
    fn location(&self) -> &str;

    /// Total size in bytes
    async fn size(&self) -> Result<u64>;

    /// Read a byte range. Ranges running past the end of the file return the
    /// bytes that exist; the result may be shorter than requested.
    async fn read_range(&self, range: ByteRange) -> Result<Fetched>;
}

/// Open a byte source from a URL or a filesystem path.
pub fn open(location: &str) -> Result<Arc<dyn ByteSource>> {
    match url::Url::parse(location) {
        #[cfg(feature = "http")]
        Ok(url) if matches!(url.scheme(), "http" | "https") => {
            Ok(Arc::new(HttpStorage::new(url.as_str())?))
        }
        Ok(url) if url.scheme() == "file" => {
            let path = url
                .to_file_path()
                .map_err(|_| Error::InvalidInput(format!("bad file URL: {}", location)))?;
            Ok(Arc::new(LocalStorage::new(path)))
        }
        // Windows drive letters parse as one-letter schemes.
        Ok(url) if url.scheme().len() > 1 => Err(Error::InvalidInput(format!(
            "unsupported URL scheme: {}",
            url.scheme()
        ))),
        _ => Ok(Arc::new(LocalStorage::new(PathBuf::from(location)))),
    }
}

/// Clamp a requested range to a known file size, returning the number of
/// bytes that can actually be served.
pub(crate) fn clamp_len(range: ByteRange, size: u64) -> u64 {
    if range.start >= size {
        return 0;
    }
    let end = range.end.map_or(size - 1, |end| end.min(size - 1));
    end.saturating_sub(range.start) + 1
}
