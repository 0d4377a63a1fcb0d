//! HTTP/HTTPS byte source.
//!
//! Every read is a single `GET` with a `Range` header. The total file size is
//! learned from the `Content-Range` response header when the server sends
//! one. Servers that ignore `Range` and answer `200 OK` with the full body
//! are handled by slicing the body locally.

use super::{ByteRange, ByteSource, Fetched, clamp_len};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};

pub struct HttpStorage {
    client: Client,
    url: String,
}

impl HttpStorage {
    pub fn new(url: &str) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| Error::Internal(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    fn check_status(&self, status: StatusCode) -> Result<()> {
        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(self.url.clone()));
        }
        if !status.is_success() {
            return Err(Error::NetworkFailure(format!(
                "{} returned HTTP {}",
                self.url, status
            )));
        }
        Ok(())
    }
}

/// Parse the total length out of a `Content-Range` value such as
/// `bytes 0-99/1234`. Returns `None` for `*` or malformed values.
fn total_from_content_range(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

#[async_trait]
impl ByteSource for HttpStorage {
    fn location(&self) -> &str {
        &self.url
    }

    async fn size(&self) -> Result<u64> {
        let response = self
            .client
            .head(&self.url)
            .send()
            .await
            .map_err(|e| Error::NetworkFailure(format!("HTTP HEAD request failed: {}", e)))?;
        self.check_status(response.status())?;

        response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| {
                Error::NetworkFailure(format!("{} has unknown length", self.url))
            })
    }

    async fn read_range(&self, range: ByteRange) -> Result<Fetched> {
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::RANGE, range.header_value())
            .send()
            .await
            .map_err(|e| Error::NetworkFailure(format!("HTTP GET request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            // Asked for bytes entirely past the end of the file.
            let total_size = response
                .headers()
                .get(reqwest::header::CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(total_from_content_range);
            return Ok(Fetched {
                bytes: bytes::Bytes::new(),
                total_size,
            });
        }
        self.check_status(status)?;

        let total_size = response
            .headers()
            .get(reqwest::header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(total_from_content_range);

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::NetworkFailure(format!("failed to read HTTP response: {}", e)))?;

        if status == StatusCode::PARTIAL_CONTENT {
            return Ok(Fetched {
                bytes: body,
                total_size,
            });
        }

        // Full body: the server ignored the Range header.
        let size = body.len() as u64;
        let len = clamp_len(range, size) as usize;
        let start = range.start.min(size) as usize;
        Ok(Fetched {
            bytes: body.slice(start..start + len),
            total_size: Some(size),
        })
    }
}
