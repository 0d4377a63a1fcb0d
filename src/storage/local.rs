use super::{ByteRange, ByteSource, Fetched, clamp_len};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

pub struct LocalStorage {
    path: PathBuf,
    location: String,
}

impl LocalStorage {
    pub fn new(path: PathBuf) -> Self {
        let location = path.display().to_string();
        Self { path, location }
    }

    async fn open(&self) -> Result<fs::File> {
        fs::File::open(&self.path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(self.location.clone()),
            _ => Error::Io(e),
        })
    }
}

#[async_trait]
impl ByteSource for LocalStorage {
    fn location(&self) -> &str {
        &self.location
    }

    async fn size(&self) -> Result<u64> {
        let metadata = fs::metadata(&self.path)
            .await
            .map_err(|_| Error::NotFound(self.location.clone()))?;
        Ok(metadata.len())
    }

    async fn read_range(&self, range: ByteRange) -> Result<Fetched> {
        let mut file = self.open().await?;
        let size = file.metadata().await?.len();

        let len = clamp_len(range, size) as usize;
        let mut buf = vec![0u8; len];
        if len > 0 {
            file.seek(std::io::SeekFrom::Start(range.start)).await?;
            file.read_exact(&mut buf).await?;
        }

        Ok(Fetched {
            bytes: Bytes::from(buf),
            total_size: Some(size),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(contents: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_read_range() {
        let file = temp_file(b"0123456789");
        let storage = LocalStorage::new(file.path().to_path_buf());

        let fetched = storage.read_range(ByteRange::new(2, 5)).await.unwrap();
        assert_eq!(&fetched.bytes[..], b"2345");
        assert_eq!(fetched.total_size, Some(10));
    }

    #[tokio::test]
    async fn test_read_past_end_is_short() {
        let file = temp_file(b"0123456789");
        let storage = LocalStorage::new(file.path().to_path_buf());

        let fetched = storage.read_range(ByteRange::new(8, 100)).await.unwrap();
        assert_eq!(&fetched.bytes[..], b"89");

        let fetched = storage.read_range(ByteRange::new(20, 30)).await.unwrap();
        assert!(fetched.bytes.is_empty());
    }

    #[tokio::test]
    async fn test_read_to_end_and_size() {
        let file = temp_file(b"0123456789");
        let storage = LocalStorage::new(file.path().to_path_buf());

        let fetched = storage.read_range(ByteRange::to_end(7)).await.unwrap();
        assert_eq!(&fetched.bytes[..], b"789");
        assert_eq!(storage.size().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let storage = LocalStorage::new(PathBuf::from("/nonexistent/genome.2bit"));
        assert!(matches!(
            storage.read_range(ByteRange::new(0, 10)).await,
            Err(Error::NotFound(_))
        ));
    }
}
