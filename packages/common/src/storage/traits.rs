use std::io::Cursor;
use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::error::StorageError;
use super::hash::ContentHash;

pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;

/// Content-addressed store for raw uploads and watermarked artifacts.
///
/// Writes are keyed by the SHA-256 of the bytes, so storing the same content
/// twice (including a regenerated artifact that happens to be identical) is a
/// no-op. Implementations must tolerate concurrent writers of the same object.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, data: &[u8]) -> Result<ContentHash, StorageError> {
        let reader: BoxReader = Box::new(Cursor::new(data.to_vec()));
        self.put_stream(reader).await
    }

    async fn put_stream(&self, reader: BoxReader) -> Result<ContentHash, StorageError>;

    /// Stream a local file into the store without loading it into memory.
    async fn put_file(&self, path: &Path) -> Result<ContentHash, StorageError> {
        let file = tokio::fs::File::open(path).await?;
        self.put_stream(Box::new(file)).await
    }

    async fn get(&self, hash: &ContentHash) -> Result<Vec<u8>, StorageError> {
        let mut reader = self.get_stream(hash).await?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    async fn get_stream(&self, hash: &ContentHash) -> Result<BoxReader, StorageError>;

    async fn exists(&self, hash: &ContentHash) -> Result<bool, StorageError>;

    /// Returns `false` when nothing was stored under `hash`.
    async fn delete(&self, hash: &ContentHash) -> Result<bool, StorageError>;

    async fn size(&self, hash: &ContentHash) -> Result<u64, StorageError>;

    /// A URL a worker can fetch the object from, if the store exposes one.
    fn locate(&self, _hash: &ContentHash) -> Option<String> {
        None
    }
}
