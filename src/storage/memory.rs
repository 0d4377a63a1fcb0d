use super::{ByteRange, ByteSource, Fetched, clamp_len};
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// A byte source backed by a buffer already in memory.
pub struct MemoryStorage {
    name: String,
    data: Bytes,
}

impl MemoryStorage {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

#[async_trait]
impl ByteSource for MemoryStorage {
    fn location(&self) -> &str {
        &self.name
    }

    async fn size(&self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    async fn read_range(&self, range: ByteRange) -> Result<Fetched> {
        let size = self.data.len() as u64;
        let len = clamp_len(range, size) as usize;
        let bytes = if len == 0 {
            Bytes::new()
        } else {
            let start = range.start as usize;
            self.data.slice(start..start + len)
        };
        Ok(Fetched {
            bytes,
            total_size: Some(size),
        })
    }
}
