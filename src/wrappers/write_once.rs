//! Delegates reads; `set` fails if the path already exists; `rm` always fails.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{StorageError, StorageResult};
use crate::fs::{Content, FileSystem, SeekableWriteStream, Stat};

pub struct WriteOnceFileSystem {
    inner: Arc<dyn FileSystem>,
}

impl WriteOnceFileSystem {
    pub fn new(inner: Arc<dyn FileSystem>) -> Self {
        Self { inner }
    }
}

impl fmt::Display for WriteOnceFileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WriteOnceFileSystem({})", self.inner)
    }
}

impl PartialEq for WriteOnceFileSystem {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Hash for WriteOnceFileSystem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        "WriteOnceFileSystem".hash(state);
        (Arc::as_ptr(&self.inner) as *const ()).hash(state);
    }
}

#[async_trait]
impl FileSystem for WriteOnceFileSystem {
    async fn exists(&self, path: &str) -> bool {
        self.inner.exists(path).await
    }

    async fn isdir(&self, path: &str) -> bool {
        self.inner.isdir(path).await
    }

    async fn isfile(&self, path: &str) -> bool {
        self.inner.isfile(path).await
    }

    async fn getmtime(&self, path: &str) -> StorageResult<f64> {
        self.inner.getmtime(path).await
    }

    async fn getsize(&self, path: &str) -> StorageResult<u64> {
        self.inner.getsize(path).await
    }

    async fn listdir(&self, path: &str, recursive: bool, max_entries: Option<usize>) -> StorageResult<Vec<String>> {
        self.inner.listdir(path, recursive, max_entries).await
    }

    async fn get(&self, path: &str) -> StorageResult<Bytes> {
        self.inner.get(path).await
    }

    async fn get_into(&self, path: &str, stream: &mut dyn SeekableWriteStream) -> StorageResult<()> {
        self.inner.get_into(path, stream).await
    }

    async fn set(&self, path: &str, content: Content<'_>) -> StorageResult<()> {
        if self.inner.exists(path).await {
            return Err(StorageError::AlreadyExists { path: path.to_string() });
        }
        self.inner.set(path, content).await
    }

    async fn rm(&self, _path: &str) -> StorageResult<()> {
        Err(StorageError::UnsupportedOnReadOnly {
            operation: "rm".to_string(),
        })
    }

    fn is_read_only(&self) -> bool {
        self.inner.is_read_only()
    }

    async fn stat(&self, path: &str) -> StorageResult<Stat> {
        self.inner.stat(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryBackend;

    #[tokio::test]
    async fn second_write_to_same_path_fails() {
        let back: Arc<dyn FileSystem> = Arc::new(MemoryBackend::isolated());
        let wrapped = WriteOnceFileSystem::new(back);

        wrapped.set("f.txt", Content::Bytes(Bytes::from_static(b"x"))).await.unwrap();
        let err = wrapped.set("f.txt", Content::Bytes(Bytes::from_static(b"y"))).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { .. }));
        assert_eq!(wrapped.get("f.txt").await.unwrap(), Bytes::from_static(b"x"));
    }

    #[tokio::test]
    async fn is_read_only_delegates_to_inner() {
        let back: Arc<dyn FileSystem> = Arc::new(MemoryBackend::isolated());
        let wrapped = WriteOnceFileSystem::new(back);
        assert!(!wrapped.is_read_only());
    }

    #[tokio::test]
    async fn rm_always_fails() {
        let back: Arc<dyn FileSystem> = Arc::new(MemoryBackend::isolated());
        let wrapped = WriteOnceFileSystem::new(back);
        wrapped.set("f.txt", Content::Bytes(Bytes::from_static(b"x"))).await.unwrap();
        assert!(wrapped.rm("f.txt").await.is_err());
    }
}
