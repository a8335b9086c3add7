//! Delegates every read to an inner filesystem, rejects every write.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{StorageError, StorageResult};
use crate::fs::{Content, FileSystem, SeekableWriteStream, Stat};

pub struct WriteProtectedFileSystem {
    inner: Arc<dyn FileSystem>,
}

impl WriteProtectedFileSystem {
    pub fn new(inner: Arc<dyn FileSystem>) -> Self {
        Self { inner }
    }
}

impl fmt::Display for WriteProtectedFileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WriteProtectedFileSystem({})", self.inner)
    }
}

impl PartialEq for WriteProtectedFileSystem {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Hash for WriteProtectedFileSystem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        "WriteProtectedFileSystem".hash(state);
        (Arc::as_ptr(&self.inner) as *const ()).hash(state);
    }
}

#[async_trait]
impl FileSystem for WriteProtectedFileSystem {
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
        self.inner.stat(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryBackend;

    #[tokio::test]
    async fn writes_are_rejected_reads_pass_through() {
        let back: Arc<dyn FileSystem> = Arc::new(MemoryBackend::isolated());
        back.set("f.txt", Content::Bytes(Bytes::from_static(b"x"))).await.unwrap();

        let protected = WriteProtectedFileSystem::new(back.clone());
        assert!(protected.is_read_only());
        assert_eq!(protected.get("f.txt").await.unwrap(), Bytes::from_static(b"x"));
        assert!(protected.set("f.txt", Content::Bytes(Bytes::from_static(b"y"))).await.is_err());
        assert!(protected.rm("f.txt").await.is_err());
        assert_eq!(back.get("f.txt").await.unwrap(), Bytes::from_static(b"x"));
    }
}
