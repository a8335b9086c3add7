//! Disk backend: a rooted local directory.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{StorageError, StorageResult};
use crate::fs::{Content, FileSystem, SeekableWriteStream};
use crate::path;
use crate::stream::{chunked_pipe, DEFAULT_CHUNK_SIZE};

/// Rooted at an absolute directory, created if it does not already exist.
/// Every path is translated by joining with the root and re-checked to still
/// begin with the root; an attempt that would escape raises `InvalidPath`.
pub struct DiskBackend {
    root: PathBuf,
}

impl DiskBackend {
    pub async fn new(root_path: impl AsRef<Path>) -> StorageResult<Self> {
        let root_path = root_path.as_ref();
        if !root_path.exists() {
            fs::create_dir_all(root_path).await?;
        }
        let meta = fs::metadata(root_path).await?;
        if !meta.is_dir() {
            return Err(StorageError::InvalidConfig {
                backend: "disk".into(),
                message: format!("rootPath='{}' is not a directory", root_path.display()),
            });
        }
        let root = fs::canonicalize(root_path).await?;
        Ok(Self { root })
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    fn rooted(&self, path: &str) -> StorageResult<PathBuf> {
        let normalized = path::normalize(path)?;
        let joined = self.root.join(&normalized);
        if !joined.starts_with(&self.root) {
            return Err(StorageError::invalid_path(path, "unsafe path detected"));
        }
        Ok(joined)
    }
}

impl fmt::Display for DiskBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DiskBackend(rootPath='{}')", self.root.display())
    }
}

impl PartialEq for DiskBackend {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
    }
}

impl Hash for DiskBackend {
    fn hash<H: Hasher>(&self, state: &mut H) {
        "DiskBackend".hash(state);
        self.root.hash(state);
    }
}

fn listdir_sync(root: &Path, dir: &Path, rel: &str, recursive: bool, out: &mut Vec<String>, max_entries: Option<usize>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        if let Some(max) = max_entries {
            if out.len() >= max {
                return Ok(());
            }
        }
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let child_rel = if rel.is_empty() {
            name.clone()
        } else {
            format!("{rel}/{name}")
        };
        out.push(child_rel.clone());
        if recursive && entry.path().is_dir() {
            listdir_sync(root, &entry.path(), &child_rel, recursive, out, max_entries)?;
        }
    }
    Ok(())
}

#[async_trait]
impl FileSystem for DiskBackend {
    async fn exists(&self, path: &str) -> bool {
        match self.rooted(path) {
            Ok(p) => fs::metadata(p).await.is_ok(),
            Err(_) => false,
        }
    }

    async fn isdir(&self, path: &str) -> bool {
        match self.rooted(path) {
            Ok(p) => fs::metadata(p).await.map(|m| m.is_dir()).unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn isfile(&self, path: &str) -> bool {
        match self.rooted(path) {
            Ok(p) => fs::metadata(p).await.map(|m| m.is_file()).unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn getmtime(&self, path: &str) -> StorageResult<f64> {
        let p = self.rooted(path)?;
        let meta = fs::metadata(&p)
            .await
            .map_err(|_| StorageError::not_found(path, "disk"))?;
        let modified = meta.modified().map_err(StorageError::Io)?;
        let secs = modified
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        Ok(secs)
    }

    async fn getsize(&self, path: &str) -> StorageResult<u64> {
        let p = self.rooted(path)?;
        let meta = fs::metadata(&p)
            .await
            .map_err(|_| StorageError::not_found(path, "disk"))?;
        Ok(meta.len())
    }

    async fn listdir(
        &self,
        path: &str,
        recursive: bool,
        max_entries: Option<usize>,
    ) -> StorageResult<Vec<String>> {
        let root = self.root.clone();
        let dir = self.rooted(path)?;
        let normalized = path::normalize(path)?;
        if !fs::metadata(&dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(StorageError::NotADirectory { path: path.to_string() });
        }

        let mut out = Vec::new();
        listdir_sync(&root, &dir, &normalized, recursive, &mut out, max_entries)?;
        out.sort();
        Ok(out)
    }

    async fn get(&self, path: &str) -> StorageResult<Bytes> {
        if !self.isfile(path).await {
            if !self.exists(path).await {
                return Err(StorageError::not_found(path, "disk"));
            }
            return Err(StorageError::NotADirectory { path: path.to_string() });
        }
        let p = self.rooted(path)?;
        let data = fs::read(p).await?;
        Ok(Bytes::from(data))
    }

    async fn get_into(&self, path: &str, stream: &mut dyn SeekableWriteStream) -> StorageResult<()> {
        if !self.isfile(path).await {
            return Err(StorageError::not_found(path, "disk"));
        }
        let p = self.rooted(path)?;
        let mut file = fs::File::open(p).await?;
        crate::stream::rewind(stream).await?;
        chunked_pipe(&mut file, stream, None, DEFAULT_CHUNK_SIZE).await?;
        Ok(())
    }

    async fn set(&self, path: &str, content: Content<'_>) -> StorageResult<()> {
        let p = self.rooted(path)?;
        if let Some(parent) = p.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(&p).await?;
        match content {
            Content::Bytes(bytes) => {
                file.write_all(&bytes).await?;
            }
            Content::Stream(stream) => {
                chunked_pipe(stream, &mut file, None, DEFAULT_CHUNK_SIZE).await?;
            }
        }
        Ok(())
    }

    async fn rm(&self, path: &str) -> StorageResult<()> {
        if path::normalize(path)?.is_empty() {
            return Err(StorageError::invalid_path(path, "cannot remove root"));
        }
        if !self.exists(path).await {
            return Err(StorageError::not_found(path, "disk"));
        }
        let p = self.rooted(path)?;
        if self.isfile(path).await {
            fs::remove_file(p).await?;
        } else {
            if !is_dir_empty_blocking(&p)? {
                return Err(StorageError::DirectoryNotEmpty { path: path.to_string() });
            }
            fs::remove_dir(&p).await?;
        }
        Ok(())
    }
}

fn is_dir_empty_blocking(p: &Path) -> std::io::Result<bool> {
    Ok(std::fs::read_dir(p)?.next().is_none())
}

/// A disk backend rooted at a freshly created, unique scratch directory,
/// removed on teardown and on `Drop`.
pub struct TempDiskBackend {
    inner: DiskBackend,
    _tempdir: tempfile::TempDir,
}

impl TempDiskBackend {
    pub async fn new() -> StorageResult<Self> {
        let tempdir = tempfile::TempDir::new().map_err(StorageError::Io)?;
        let inner = DiskBackend::new(tempdir.path()).await?;
        Ok(Self {
            inner,
            _tempdir: tempdir,
        })
    }

    pub fn root_path(&self) -> &Path {
        self.inner.root_path()
    }
}

impl fmt::Display for TempDiskBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TempDiskBackend({})", self.inner)
    }
}

#[async_trait]
impl FileSystem for TempDiskBackend {
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
        self.inner.set(path, content).await
    }
    async fn rm(&self, path: &str) -> StorageResult<()> {
        self.inner.rm(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::Content;

    #[tokio::test]
    async fn flat_lifecycle() {
        let backend = TempDiskBackend::new().await.unwrap();
        assert!(!backend.exists("test.txt").await);

        backend
            .set("test.txt", Content::Bytes(Bytes::from_static(b"abc")))
            .await
            .unwrap();
        assert_eq!(backend.get("test.txt").await.unwrap(), Bytes::from_static(b"abc"));
        assert_eq!(backend.getsize("test.txt").await.unwrap(), 3);
        assert_eq!(backend.listdir("", false, None).await.unwrap(), vec!["test.txt"]);

        backend.rm("test.txt").await.unwrap();
        assert!(backend.listdir("", false, None).await.unwrap().is_empty());
        assert!(backend.rm("test.txt").await.is_err());
    }

    #[tokio::test]
    async fn nested_directories() {
        let backend = TempDiskBackend::new().await.unwrap();
        backend
            .set("dir1/test.txt", Content::Bytes(Bytes::from_static(b"abc")))
            .await
            .unwrap();

        assert_eq!(backend.listdir("", false, None).await.unwrap(), vec!["dir1"]);
        let mut recursive = backend.listdir("", true, None).await.unwrap();
        recursive.sort();
        assert_eq!(recursive, vec!["dir1", "dir1/test.txt"]);
        assert_eq!(backend.listdir("dir1", false, None).await.unwrap(), vec!["dir1/test.txt"]);
        assert!(backend.listdir("dir1/dir2/file.txt", false, None).await.is_err());
    }

    #[tokio::test]
    async fn unsafe_path_is_rejected() {
        let backend = TempDiskBackend::new().await.unwrap();
        assert!(!backend.exists("../../etc/passwd").await);
    }

    #[tokio::test]
    async fn max_entries_truncates_listing() {
        let backend = TempDiskBackend::new().await.unwrap();
        for i in 0..5 {
            backend
                .set(&format!("f{i}.txt"), Content::Bytes(Bytes::from_static(b"x")))
                .await
                .unwrap();
        }
        let listed = backend.listdir("", false, Some(2)).await.unwrap();
        assert_eq!(listed.len(), 2);
    }
}
