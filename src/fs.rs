//! The abstract `FileSystem` contract every backend and wrapper implements.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite};

use crate::error::StorageResult;

/// Result of `stat`: modification time (seconds since epoch) and size in bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stat {
    pub modtime: f64,
    pub size: u64,
}

/// A directory entry surfaced by `iterate_files`, optionally carrying metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub path: String,
    pub modtime: Option<f64>,
    pub size: Option<u64>,
}

/// Bound satisfied by any stream `set` can read a seekable upload source from.
pub trait SeekableReadStream: AsyncRead + AsyncSeek + Send + Unpin {}
impl<T: AsyncRead + AsyncSeek + Send + Unpin> SeekableReadStream for T {}

/// Bound satisfied by any stream `get_into` can write a download destination into.
pub trait SeekableWriteStream: AsyncWrite + AsyncSeek + Send + Unpin {}
impl<T: AsyncWrite + AsyncSeek + Send + Unpin> SeekableWriteStream for T {}

/// The content argument to `set`: either an in-memory blob or a seekable
/// stream already positioned at 0.
pub enum Content<'a> {
    Bytes(Bytes),
    Stream(&'a mut dyn SeekableReadStream),
}

impl<'a> From<Bytes> for Content<'a> {
    fn from(b: Bytes) -> Self {
        Content::Bytes(b)
    }
}

impl<'a> From<&'a [u8]> for Content<'a> {
    fn from(b: &'a [u8]) -> Self {
        Content::Bytes(Bytes::copy_from_slice(b))
    }
}

/// Uniform async abstraction over a tree of files and directories.
///
/// Every path is absolute text using `/` as separator; the empty string and
/// `/` both denote the root. There is no working-directory concept.
#[async_trait]
pub trait FileSystem: Send + Sync + std::fmt::Display {
    async fn exists(&self, path: &str) -> bool;

    async fn isdir(&self, path: &str) -> bool;

    async fn isfile(&self, path: &str) -> bool;

    /// Seconds since epoch of the last modification. Errs if `path` is absent
    /// or inaccessible.
    async fn getmtime(&self, path: &str) -> StorageResult<f64>;

    /// Size in bytes. Errs if `path` is absent, a directory, or inaccessible.
    async fn getsize(&self, path: &str) -> StorageResult<u64>;

    /// Full paths rooted at `path` (not bare basenames). `path` must be a
    /// directory or the root. `recursive` includes descendants;
    /// `max_entries` truncates the result at exactly that many entries.
    async fn listdir(
        &self,
        path: &str,
        recursive: bool,
        max_entries: Option<usize>,
    ) -> StorageResult<Vec<String>>;

    async fn get(&self, path: &str) -> StorageResult<Bytes>;

    /// Fills `stream` with the contents of `path`. `stream` must be seekable
    /// and at position 0; it is rewound to 0 before being filled, so a
    /// failed attempt mid-retry restarts cleanly.
    async fn get_into(&self, path: &str, stream: &mut dyn SeekableWriteStream) -> StorageResult<()>;

    /// Creates or overwrites `path`. Stream content must already be at position 0.
    async fn set(&self, path: &str, content: Content<'_>) -> StorageResult<()>;

    /// Removes a file, or an empty directory. Errs if absent, non-empty, or
    /// inaccessible.
    async fn rm(&self, path: &str) -> StorageResult<()>;

    /// Whether `set`/`rm` unconditionally fail on this instance.
    fn is_read_only(&self) -> bool {
        false
    }

    /// Whether this instance is suitable as the front of a `CachedFileSystem`.
    /// S3 overrides this to `false`: its `getmtime`/`getsize` already cost a
    /// network round trip, so caching in front of it buys nothing and the
    /// Python original asserts against it at construction time.
    fn is_suitable_cache_front(&self) -> bool {
        true
    }

    /// Default: combine `getmtime` and `getsize`. Backends may override with
    /// a single round trip (S3, FTP with MLSD, SFTP all do).
    async fn stat(&self, path: &str) -> StorageResult<Stat> {
        let modtime = self.getmtime(path).await?;
        let size = self.getsize(path).await?;
        Ok(Stat { modtime, size })
    }

    /// Default: walk the directory containing `prefix`'s last component (or
    /// the closest existing ancestor), recursively list, keep entries that
    /// start with `prefix` and are files.
    async fn list_files(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let prefix = prefix.trim_start_matches('/');
        let parts: Vec<&str> = prefix.split('/').collect();

        let path = if self.isdir(prefix).await {
            prefix.to_string()
        } else if parts.len() > 1 {
            parts[..parts.len() - 1].join("/")
        } else {
            String::new()
        };

        let mut out = Vec::new();
        for candidate in self.listdir(&path, true, None).await? {
            if candidate.starts_with(prefix) && self.isfile(&candidate).await {
                out.push(candidate);
            }
        }
        Ok(out)
    }

    /// Default: filter `listdir` down to directory entries.
    async fn list_subdirs(&self, path: &str, recursive: bool) -> StorageResult<Vec<String>> {
        let mut out = Vec::new();
        for candidate in self.listdir(path, recursive, None).await? {
            if self.isdir(&candidate).await {
                out.push(candidate);
            }
        }
        Ok(out)
    }

    /// Default: built on `list_files`, applying `subpath_filter` (a path that
    /// fails the filter is pruned, along with everything under it) and
    /// attaching modtime/size when `with_meta` is set. Realized eagerly
    /// rather than as a lazy sequence — see DESIGN.md for why. Backends with
    /// a cheaper native walk (S3's paginator) override this.
    async fn iterate_files(
        &self,
        prefix: &str,
        subpath_filter: Option<&(dyn Fn(&str) -> bool + Sync)>,
        with_meta: bool,
    ) -> StorageResult<Vec<FileEntry>> {
        let mut out = Vec::new();
        for path in self.list_files(prefix).await? {
            if let Some(filter) = subpath_filter {
                if !filter(&path) {
                    continue;
                }
            }
            let (modtime, size) = if with_meta {
                (Some(self.getmtime(&path).await?), Some(self.getsize(&path).await?))
            } else {
                (None, None)
            };
            out.push(FileEntry { path, modtime, size });
        }
        Ok(out)
    }
}
