use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tracing::debug;

use super::error::StorageError;
use super::hash::{ContentHash, ContentHasher};
use super::traits::{BlobStore, BoxReader};

const READ_CHUNK: usize = 64 * 1024;

/// Content store on a local (or shared) volume.
///
/// Layout is `{root}/{2 hex}/{62 hex}`. Writes land in `{root}/.tmp` first and
/// are renamed into place, so readers never observe a partial object.
pub struct FilesystemBlobStore {
    root: PathBuf,
    max_size: u64,
}

impl FilesystemBlobStore {
    pub async fn new(root: PathBuf, max_size: u64) -> Result<Self, StorageError> {
        fs::create_dir_all(root.join(".tmp")).await?;
        Ok(Self { root, max_size })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn object_path(&self, hash: &ContentHash) -> PathBuf {
        self.root.join(hash.shard_prefix()).join(hash.shard_suffix())
    }

    fn staging_path(&self) -> PathBuf {
        self.root.join(".tmp").join(uuid::Uuid::new_v4().to_string())
    }

    async fn commit(&self, staged: &Path, hash: &ContentHash) -> Result<(), StorageError> {
        let target = self.object_path(hash);
        if fs::try_exists(&target).await? {
            let _ = fs::remove_file(staged).await;
            debug!(hash = %hash, "Object already stored");
            return Ok(());
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Rename is atomic within one filesystem; a concurrent writer of the
        // same digest simply replaces identical bytes.
        if let Err(e) = fs::rename(staged, &target).await {
            let _ = fs::remove_file(staged).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn put_stream(&self, mut reader: BoxReader) -> Result<ContentHash, StorageError> {
        let staged = self.staging_path();
        let mut file = fs::File::create(&staged).await?;
        let mut hasher = ContentHasher::new();
        let mut buf = vec![0u8; READ_CHUNK];

        let written: Result<(), StorageError> = async {
            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                if hasher.len() > self.max_size {
                    return Err(StorageError::SizeLimitExceeded {
                        actual: hasher.len(),
                        limit: self.max_size,
                    });
                }
                file.write_all(&buf[..n]).await?;
            }
            file.flush().await?;
            Ok(())
        }
        .await;
        drop(file);

        if let Err(e) = written {
            let _ = fs::remove_file(&staged).await;
            return Err(e);
        }

        let hash = hasher.finalize();
        self.commit(&staged, &hash).await?;
        Ok(hash)
    }

    async fn get_stream(&self, hash: &ContentHash) -> Result<BoxReader, StorageError> {
        match fs::File::open(self.object_path(hash)).await {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(hash.to_hex()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, hash: &ContentHash) -> Result<bool, StorageError> {
        Ok(fs::try_exists(self.object_path(hash)).await?)
    }

    async fn delete(&self, hash: &ContentHash) -> Result<bool, StorageError> {
        match fs::remove_file(self.object_path(hash)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn size(&self, hash: &ContentHash) -> Result<u64, StorageError> {
        match fs::metadata(self.object_path(hash)).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(hash.to_hex()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn locate(&self, hash: &ContentHash) -> Option<String> {
        let path = self.object_path(hash);
        let absolute = if path.is_absolute() {
            path
        } else {
            std::env::current_dir().ok()?.join(path)
        };
        Some(format!("file://{}", absolute.display()))
    }
}
