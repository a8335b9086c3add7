//! Lazily copies file content from `back` into `front` the first time it is
//! read through `front`, then serves subsequent reads from `front`. Writes go
//! to both. Unlike `CachedFileSystem` this is not read-only: `front` becomes
//! a genuine, independently writable replica that starts out lagging `back`.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::{StorageError, StorageResult};
use crate::fs::{Content, FileSystem, SeekableReadStream, SeekableWriteStream, Stat};

pub struct CloningFileSystem {
    front: Arc<dyn FileSystem>,
    back: Arc<dyn FileSystem>,
}

impl CloningFileSystem {
    pub fn new(front: Arc<dyn FileSystem>, back: Arc<dyn FileSystem>) -> Self {
        Self { front, back }
    }

    /// Spools `path`'s content from `back` into `front` if `front` doesn't
    /// already have it. A no-op if `front` already has it; errs if neither does.
    async fn clone_into_front(&self, path: &str) -> StorageResult<()> {
        if self.front.isfile(path).await {
            return Ok(());
        }
        let data = self.back.get(path).await?;
        self.front.set(path, Content::Bytes(data)).await
    }
}

impl fmt::Display for CloningFileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CloningFileSystem(front={}, back={})", self.front, self.back)
    }
}

impl PartialEq for CloningFileSystem {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.front, &other.front) && Arc::ptr_eq(&self.back, &other.back)
    }
}

impl Hash for CloningFileSystem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        "CloningFileSystem".hash(state);
        (Arc::as_ptr(&self.front) as *const ()).hash(state);
        (Arc::as_ptr(&self.back) as *const ()).hash(state);
    }
}

#[async_trait]
impl FileSystem for CloningFileSystem {
    async fn exists(&self, path: &str) -> bool {
        self.front.exists(path).await || self.back.exists(path).await
    }

    async fn isdir(&self, path: &str) -> bool {
        self.front.isdir(path).await || self.back.isdir(path).await
    }

    async fn isfile(&self, path: &str) -> bool {
        self.front.isfile(path).await || self.back.isfile(path).await
    }

    /// Tries `front` first; if `front` doesn't have the path but `back` does,
    /// clones it into `front` and retries once.
    async fn getmtime(&self, path: &str) -> StorageResult<f64> {
        match self.front.getmtime(path).await {
            Ok(mtime) => Ok(mtime),
            Err(front_err) => {
                if self.back.isfile(path).await {
                    self.clone_into_front(path).await?;
                    self.front.getmtime(path).await
                } else {
                    Err(front_err)
                }
            }
        }
    }

    async fn getsize(&self, path: &str) -> StorageResult<u64> {
        match self.front.getsize(path).await {
            Ok(size) => Ok(size),
            Err(front_err) => {
                if self.back.isfile(path).await {
                    self.clone_into_front(path).await?;
                    self.front.getsize(path).await
                } else {
                    Err(front_err)
                }
            }
        }
    }

    /// Unions both listings, tolerating either side failing outright (e.g.
    /// the path not yet existing on that side).
    async fn listdir(&self, path: &str, recursive: bool, max_entries: Option<usize>) -> StorageResult<Vec<String>> {
        let front_result = self.front.listdir(path, recursive, None).await;
        let back_result = self.back.listdir(path, recursive, None).await;

        let mut combined: Vec<String> = match (front_result, back_result) {
            (Ok(a), Ok(b)) => {
                let mut set: std::collections::BTreeSet<String> = a.into_iter().collect();
                set.extend(b);
                set.into_iter().collect()
            }
            (Ok(a), Err(_)) => a,
            (Err(_), Ok(b)) => b,
            (Err(e), Err(_)) => return Err(e),
        };
        combined.sort();
        if let Some(max) = max_entries {
            combined.truncate(max);
        }
        Ok(combined)
    }

    /// Populating `front` is a best-effort cache warm: if `front` can't be
    /// written (e.g. it's read-only or momentarily unreachable), the data
    /// fetched from `back` is still returned.
    async fn get(&self, path: &str) -> StorageResult<Bytes> {
        if self.front.isfile(path).await {
            return self.front.get(path).await;
        }
        let data = self.back.get(path).await?;
        if let Err(err) = self.front.set(path, Content::Bytes(data.clone())).await {
            tracing::warn!(path, error = %err, "failed to clone into front, serving from back anyway");
        }
        Ok(data)
    }

    async fn get_into(&self, path: &str, stream: &mut dyn SeekableWriteStream) -> StorageResult<()> {
        if !self.front.isfile(path).await {
            self.clone_into_front(path).await?;
        }
        self.front.get_into(path, stream).await
    }

    /// Writes to `back` then `front`. A seekable stream source is rewound
    /// and reused for both; anything else is spooled into a buffer first so
    /// both writes see identical content.
    async fn set(&self, path: &str, content: Content<'_>) -> StorageResult<()> {
        match content {
            Content::Bytes(bytes) => {
                self.back.set(path, Content::Bytes(bytes.clone())).await?;
                self.front.set(path, Content::Bytes(bytes)).await
            }
            Content::Stream(stream) => {
                let buffer = spool(stream).await?;
                self.back.set(path, Content::Bytes(buffer.clone())).await?;
                self.front.set(path, Content::Bytes(buffer)).await
            }
        }
    }

    /// Always attempts `front` then unconditionally attempts `back` as well,
    /// even if the `front` attempt failed; the return value reflects `front`'s
    /// outcome.
    async fn rm(&self, path: &str) -> StorageResult<()> {
        let front_result = self.front.rm(path).await;
        let _ = self.back.rm(path).await;
        front_result
    }

    async fn stat(&self, path: &str) -> StorageResult<Stat> {
        let modtime = self.getmtime(path).await?;
        let size = self.getsize(path).await?;
        Ok(Stat { modtime, size })
    }
}

async fn spool(stream: &mut dyn SeekableReadStream) -> StorageResult<Bytes> {
    stream
        .seek(std::io::SeekFrom::Start(0))
        .await
        .map_err(StorageError::Io)?;
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.map_err(StorageError::Io)?;
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryBackend;

    #[tokio::test]
    async fn first_read_clones_into_front() {
        let front: Arc<dyn FileSystem> = Arc::new(MemoryBackend::isolated());
        let back: Arc<dyn FileSystem> = Arc::new(MemoryBackend::isolated());
        back.set("f.txt", Content::Bytes(Bytes::from_static(b"x"))).await.unwrap();

        let cloning = CloningFileSystem::new(front.clone(), back.clone());
        assert_eq!(cloning.get("f.txt").await.unwrap(), Bytes::from_static(b"x"));
        assert!(front.exists("f.txt").await);
    }

    #[tokio::test]
    async fn set_writes_both_sides() {
        let front: Arc<dyn FileSystem> = Arc::new(MemoryBackend::isolated());
        let back: Arc<dyn FileSystem> = Arc::new(MemoryBackend::isolated());
        let cloning = CloningFileSystem::new(front.clone(), back.clone());

        cloning.set("f.txt", Content::Bytes(Bytes::from_static(b"x"))).await.unwrap();
        assert_eq!(front.get("f.txt").await.unwrap(), Bytes::from_static(b"x"));
        assert_eq!(back.get("f.txt").await.unwrap(), Bytes::from_static(b"x"));
    }

    #[tokio::test]
    async fn rm_attempts_both_and_returns_front_outcome() {
        let front: Arc<dyn FileSystem> = Arc::new(MemoryBackend::isolated());
        let back: Arc<dyn FileSystem> = Arc::new(MemoryBackend::isolated());
        back.set("f.txt", Content::Bytes(Bytes::from_static(b"x"))).await.unwrap();
        let cloning = CloningFileSystem::new(front.clone(), back.clone());

        let result = cloning.rm("f.txt").await;
        assert!(result.is_err());
        assert!(!back.exists("f.txt").await);
    }

    #[tokio::test]
    async fn get_still_returns_data_when_front_clone_write_fails() {
        use crate::wrappers::WriteProtectedFileSystem;

        let front: Arc<dyn FileSystem> = Arc::new(WriteProtectedFileSystem::new(Arc::new(MemoryBackend::isolated())));
        let back: Arc<dyn FileSystem> = Arc::new(MemoryBackend::isolated());
        back.set("f.txt", Content::Bytes(Bytes::from_static(b"x"))).await.unwrap();

        let cloning = CloningFileSystem::new(front.clone(), back.clone());
        assert_eq!(cloning.get("f.txt").await.unwrap(), Bytes::from_static(b"x"));
        assert!(!front.exists("f.txt").await);
    }

    #[tokio::test]
    async fn listdir_unions_both_sides() {
        let front: Arc<dyn FileSystem> = Arc::new(MemoryBackend::isolated());
        let back: Arc<dyn FileSystem> = Arc::new(MemoryBackend::isolated());
        front.set("a.txt", Content::Bytes(Bytes::from_static(b"1"))).await.unwrap();
        back.set("b.txt", Content::Bytes(Bytes::from_static(b"2"))).await.unwrap();
        let cloning = CloningFileSystem::new(front, back);

        assert_eq!(cloning.listdir("", false, None).await.unwrap(), vec!["a.txt", "b.txt"]);
    }
}
