//! Read-through cache: serves `get` from `front` when present, otherwise
//! fetches from `back` and populates `front` for next time. `exists`/`isdir`/
//! `isfile` check `front` first, so a cached-but-not-yet-expired entry is
//! visible even if `back` has since changed. Metadata that needs to stay
//! authoritative — size, mtime, directory listings — always goes to `back`,
//! since a stale cache entry must never look newer or bigger than the source
//! of truth.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{StorageError, StorageResult};
use crate::fs::{Content, FileSystem, SeekableWriteStream, Stat};

pub struct CachedFileSystem {
    front: Arc<dyn FileSystem>,
    back: Arc<dyn FileSystem>,
}

impl CachedFileSystem {
    /// Errs if `front` is unsuited to be a cache (S3, whose own lookups are
    /// already a network round trip).
    pub fn new(front: Arc<dyn FileSystem>, back: Arc<dyn FileSystem>) -> StorageResult<Self> {
        if !front.is_suitable_cache_front() {
            return Err(StorageError::InvalidConfig {
                backend: "cached".to_string(),
                message: format!("{front} cannot be used as a cache front"),
            });
        }
        Ok(Self { front, back })
    }
}

impl fmt::Display for CachedFileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CachedFileSystem(front={}, back={})", self.front, self.back)
    }
}

impl PartialEq for CachedFileSystem {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.front, &other.front) && Arc::ptr_eq(&self.back, &other.back)
    }
}

impl Hash for CachedFileSystem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        "CachedFileSystem".hash(state);
        (Arc::as_ptr(&self.front) as *const ()).hash(state);
        (Arc::as_ptr(&self.back) as *const ()).hash(state);
    }
}

#[async_trait]
impl FileSystem for CachedFileSystem {
    async fn exists(&self, path: &str) -> bool {
        self.front.exists(path).await || self.back.exists(path).await
    }

    async fn isdir(&self, path: &str) -> bool {
        self.front.isdir(path).await || self.back.isdir(path).await
    }

    async fn isfile(&self, path: &str) -> bool {
        self.front.isfile(path).await || self.back.isfile(path).await
    }

    async fn getmtime(&self, path: &str) -> StorageResult<f64> {
        self.back.getmtime(path).await
    }

    async fn getsize(&self, path: &str) -> StorageResult<u64> {
        self.back.getsize(path).await
    }

    async fn listdir(&self, path: &str, recursive: bool, max_entries: Option<usize>) -> StorageResult<Vec<String>> {
        self.back.listdir(path, recursive, max_entries).await
    }

    async fn get(&self, path: &str) -> StorageResult<Bytes> {
        if self.front.isfile(path).await {
            return self.front.get(path).await;
        }
        let data = self.back.get(path).await?;
        let _ = self.front.set(path, Content::Bytes(data.clone())).await;
        Ok(data)
    }

    async fn get_into(&self, path: &str, stream: &mut dyn SeekableWriteStream) -> StorageResult<()> {
        let data = self.get(path).await?;
        crate::stream::rewind(stream).await?;
        tokio::io::AsyncWriteExt::write_all(stream, &data).await?;
        Ok(())
    }

    async fn set(&self, _path: &str, _content: Content<'_>) -> StorageResult<()> {
        Err(StorageError::UnsupportedOnReadOnly {
            operation: "set".to_string(),
        })
    }

    async fn rm(&self, _path: &str) -> StorageResult<()> {
        Err(StorageError::UnsupportedOnReadOnly {
            operation: "rm".to_string(),
        })
    }

    fn is_read_only(&self) -> bool {
        true
    }

    async fn stat(&self, path: &str) -> StorageResult<Stat> {
        self.back.stat(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryBackend;

    #[tokio::test]
    async fn populates_front_on_first_read() {
        let front: Arc<dyn FileSystem> = Arc::new(MemoryBackend::isolated());
        let back: Arc<dyn FileSystem> = Arc::new(MemoryBackend::isolated());
        back.set("f.txt", Content::Bytes(Bytes::from_static(b"x"))).await.unwrap();

        let cached = CachedFileSystem::new(front.clone(), back.clone()).unwrap();
        assert!(!front.exists("f.txt").await);
        assert_eq!(cached.get("f.txt").await.unwrap(), Bytes::from_static(b"x"));
        assert!(front.exists("f.txt").await);
    }

    #[tokio::test]
    async fn serves_from_front_without_touching_back_afterward() {
        let front: Arc<dyn FileSystem> = Arc::new(MemoryBackend::isolated());
        let back: Arc<dyn FileSystem> = Arc::new(MemoryBackend::isolated());
        back.set("f.txt", Content::Bytes(Bytes::from_static(b"x"))).await.unwrap();
        let cached = CachedFileSystem::new(front.clone(), back.clone()).unwrap();
        cached.get("f.txt").await.unwrap();

        back.rm("f.txt").await.unwrap();
        assert_eq!(cached.get("f.txt").await.unwrap(), Bytes::from_static(b"x"));
    }

    #[tokio::test]
    async fn existence_checks_prefer_front_over_back() {
        let front: Arc<dyn FileSystem> = Arc::new(MemoryBackend::isolated());
        let back: Arc<dyn FileSystem> = Arc::new(MemoryBackend::isolated());
        front
            .set("only-in-front.txt", Content::Bytes(Bytes::from_static(b"x")))
            .await
            .unwrap();

        let cached = CachedFileSystem::new(front, back.clone()).unwrap();
        assert!(!back.exists("only-in-front.txt").await);
        assert!(cached.exists("only-in-front.txt").await);
        assert!(cached.isfile("only-in-front.txt").await);
        assert!(cached.isdir("").await);
    }

    #[tokio::test]
    async fn writes_are_rejected() {
        let front: Arc<dyn FileSystem> = Arc::new(MemoryBackend::isolated());
        let back: Arc<dyn FileSystem> = Arc::new(MemoryBackend::isolated());
        let cached = CachedFileSystem::new(front, back).unwrap();
        assert!(cached.set("f.txt", Content::Bytes(Bytes::from_static(b"x"))).await.is_err());
        assert!(cached.rm("f.txt").await.is_err());
    }
}
