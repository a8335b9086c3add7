//! In-memory backend: a process-wide tree of files and directories.
//!
//! A fresh instance mints a private subtree under the process-wide tree and
//! anchors itself there, so two default-constructed instances never collide
//! on a top-level name. `MemoryBackend::with_root_path` anchors at a
//! caller-chosen path instead, letting two instances deliberately share a
//! subtree. `MemoryBackend::isolated` owns a tree of its own, entirely
//! outside the process-wide one — used by tests that must not see any other
//! instance's writes.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use once_cell::sync::Lazy;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::{StorageError, StorageResult};
use crate::fs::{Content, FileSystem, SeekableWriteStream};
use crate::path;

#[derive(Debug, Clone)]
enum Node {
    File { data: Bytes, mtime: f64 },
    Dir(BTreeMap<String, Node>),
}

impl Node {
    fn new_dir() -> Self {
        Node::Dir(BTreeMap::new())
    }
}

static PROCESS_ROOT: Lazy<Arc<Mutex<Node>>> = Lazy::new(|| Arc::new(Mutex::new(Node::new_dir())));

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

pub struct MemoryBackend {
    root: Arc<Mutex<Node>>,
    anchor: Vec<String>,
    label: String,
}

impl MemoryBackend {
    /// Mints a private subtree under the process-wide tree and anchors this
    /// instance there, so separately-constructed default instances never
    /// collide on a top-level path the way aliasing the whole shared tree
    /// would.
    pub fn new() -> Self {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        let anchor = vec![format!("mem-{}-{id}", std::process::id())];
        {
            let mut root = PROCESS_ROOT.lock().unwrap();
            Self::ensure_parent_dirs(&mut root, &anchor).expect("anchor path never crosses a file");
        }
        let label = anchor.join("/");
        Self {
            root: PROCESS_ROOT.clone(),
            anchor,
            label,
        }
    }

    /// Anchors this instance at `root_path` under the process-wide tree.
    /// Two instances constructed with the same `root_path` observe the same
    /// subtree and each other's writes.
    pub fn with_root_path(root_path: &str) -> StorageResult<Self> {
        let anchor = path::split_path(root_path)?;
        {
            let mut root = PROCESS_ROOT.lock().unwrap();
            Self::ensure_parent_dirs(&mut root, &anchor)?;
        }
        Ok(Self {
            root: PROCESS_ROOT.clone(),
            label: format!("shared:{}", anchor.join("/")),
            anchor,
        })
    }

    /// A private tree, invisible to `new()` instances, `with_root_path`
    /// instances, and other `isolated()` instances.
    pub fn isolated() -> Self {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        Self {
            root: Arc::new(Mutex::new(Node::new_dir())),
            anchor: Vec::new(),
            label: format!("isolated-{id}"),
        }
    }

    fn full_parts(&self, path: &str) -> StorageResult<Vec<String>> {
        let mut parts = self.anchor.clone();
        parts.extend(path::split_path(path)?);
        Ok(parts)
    }

    fn lookup<'a>(root: &'a Node, parts: &[String]) -> Option<&'a Node> {
        let mut current = root;
        for part in parts {
            match current {
                Node::Dir(children) => current = children.get(part)?,
                Node::File { .. } => return None,
            }
        }
        Some(current)
    }

    fn lookup_dir_mut<'a>(root: &'a mut Node, parts: &[String]) -> Option<&'a mut BTreeMap<String, Node>> {
        let mut current = root;
        for part in parts {
            match current {
                Node::Dir(children) => current = children.get_mut(part)?,
                Node::File { .. } => return None,
            }
        }
        match current {
            Node::Dir(children) => Some(children),
            Node::File { .. } => None,
        }
    }

    /// Ensures every ancestor directory of `parts` exists, creating them as needed.
    fn ensure_parent_dirs(root: &mut Node, parts: &[String]) -> StorageResult<()> {
        let mut current = root;
        for part in parts {
            match current {
                Node::Dir(children) => {
                    current = children.entry(part.clone()).or_insert_with(Node::new_dir);
                }
                Node::File { .. } => {
                    return Err(StorageError::NotADirectory {
                        path: parts.join("/"),
                    });
                }
            }
        }
        Ok(())
    }

    fn collect(node: &Node, prefix: &str, recursive: bool, out: &mut Vec<String>, max_entries: Option<usize>) {
        if let Node::Dir(children) = node {
            for (name, child) in children {
                if let Some(max) = max_entries {
                    if out.len() >= max {
                        return;
                    }
                }
                let full = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}/{name}")
                };
                out.push(full.clone());
                if recursive {
                    Self::collect(child, &full, recursive, out, max_entries);
                }
            }
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryBackend({})", self.label)
    }
}

impl PartialEq for MemoryBackend {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.root, &other.root) && self.anchor == other.anchor
    }
}

impl Hash for MemoryBackend {
    fn hash<H: Hasher>(&self, state: &mut H) {
        "MemoryBackend".hash(state);
        (Arc::as_ptr(&self.root) as *const ()).hash(state);
        self.anchor.hash(state);
    }
}

#[async_trait]
impl FileSystem for MemoryBackend {
    async fn exists(&self, path: &str) -> bool {
        let Ok(parts) = self.full_parts(path) else {
            return false;
        };
        let root = self.root.lock().unwrap();
        Self::lookup(&root, &parts).is_some()
    }

    async fn isdir(&self, path: &str) -> bool {
        let Ok(parts) = self.full_parts(path) else {
            return false;
        };
        let root = self.root.lock().unwrap();
        matches!(Self::lookup(&root, &parts), Some(Node::Dir(_)))
    }

    async fn isfile(&self, path: &str) -> bool {
        let Ok(parts) = self.full_parts(path) else {
            return false;
        };
        let root = self.root.lock().unwrap();
        matches!(Self::lookup(&root, &parts), Some(Node::File { .. }))
    }

    async fn getmtime(&self, path: &str) -> StorageResult<f64> {
        let parts = self.full_parts(path)?;
        let root = self.root.lock().unwrap();
        match Self::lookup(&root, &parts) {
            Some(Node::File { mtime, .. }) => Ok(*mtime),
            Some(Node::Dir(_)) => Err(StorageError::NotADirectory { path: path.to_string() }),
            None => Err(StorageError::not_found(path, "memory")),
        }
    }

    async fn getsize(&self, path: &str) -> StorageResult<u64> {
        let parts = self.full_parts(path)?;
        let root = self.root.lock().unwrap();
        match Self::lookup(&root, &parts) {
            Some(Node::File { data, .. }) => Ok(data.len() as u64),
            Some(Node::Dir(_)) => Err(StorageError::NotADirectory { path: path.to_string() }),
            None => Err(StorageError::not_found(path, "memory")),
        }
    }

    async fn listdir(
        &self,
        path: &str,
        recursive: bool,
        max_entries: Option<usize>,
    ) -> StorageResult<Vec<String>> {
        let parts = self.full_parts(path)?;
        let normalized = path::normalize(path)?;
        let root = self.root.lock().unwrap();
        let node = Self::lookup(&root, &parts).ok_or_else(|| StorageError::not_found(path, "memory"))?;
        if !matches!(node, Node::Dir(_)) {
            return Err(StorageError::NotADirectory { path: path.to_string() });
        }
        let mut out = Vec::new();
        Self::collect(node, &normalized, recursive, &mut out, max_entries);
        Ok(out)
    }

    async fn get(&self, path: &str) -> StorageResult<Bytes> {
        let parts = self.full_parts(path)?;
        let root = self.root.lock().unwrap();
        match Self::lookup(&root, &parts) {
            Some(Node::File { data, .. }) => Ok(data.clone()),
            Some(Node::Dir(_)) => Err(StorageError::NotADirectory { path: path.to_string() }),
            None => Err(StorageError::not_found(path, "memory")),
        }
    }

    async fn get_into(&self, path: &str, stream: &mut dyn SeekableWriteStream) -> StorageResult<()> {
        let data = self.get(path).await?;
        crate::stream::rewind(stream).await?;
        tokio::io::AsyncWriteExt::write_all(stream, &data).await?;
        Ok(())
    }

    async fn set(&self, path: &str, content: Content<'_>) -> StorageResult<()> {
        if path::normalize(path)?.is_empty() {
            return Err(StorageError::invalid_path(path, "cannot write to root"));
        }
        let parts = self.full_parts(path)?;
        let data = match content {
            Content::Bytes(bytes) => bytes,
            Content::Stream(stream) => {
                stream.seek(std::io::SeekFrom::Start(0)).await?;
                let mut buf = Vec::new();
                stream.read_to_end(&mut buf).await?;
                Bytes::from(buf)
            }
        };

        let (dir_parts, name) = parts.split_at(parts.len() - 1);
        let name = name[0].clone();
        let mut root = self.root.lock().unwrap();
        Self::ensure_parent_dirs(&mut root, dir_parts)?;
        let children =
            Self::lookup_dir_mut(&mut root, dir_parts).ok_or_else(|| StorageError::NotADirectory {
                path: dir_parts.join("/"),
            })?;
        if matches!(children.get(&name), Some(Node::Dir(_))) {
            return Err(StorageError::NotADirectory { path: path.to_string() });
        }
        children.insert(
            name,
            Node::File {
                data,
                mtime: now_secs(),
            },
        );
        Ok(())
    }

    async fn rm(&self, path: &str) -> StorageResult<()> {
        if path::normalize(path)?.is_empty() {
            return Err(StorageError::invalid_path(path, "cannot remove root"));
        }
        let parts = self.full_parts(path)?;
        let (dir_parts, name) = parts.split_at(parts.len() - 1);
        let name = &name[0];
        let mut root = self.root.lock().unwrap();
        let children = Self::lookup_dir_mut(&mut root, dir_parts)
            .ok_or_else(|| StorageError::not_found(path, "memory"))?;
        match children.get(name) {
            Some(Node::Dir(grandchildren)) if !grandchildren.is_empty() => {
                Err(StorageError::DirectoryNotEmpty { path: path.to_string() })
            }
            Some(_) => {
                children.remove(name);
                Ok(())
            }
            None => Err(StorageError::not_found(path, "memory")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::Content;

    #[tokio::test]
    async fn isolated_instances_do_not_share_state() {
        let a = MemoryBackend::isolated();
        let b = MemoryBackend::isolated();
        a.set("f.txt", Content::Bytes(Bytes::from_static(b"x"))).await.unwrap();
        assert!(a.exists("f.txt").await);
        assert!(!b.exists("f.txt").await);
    }

    #[tokio::test]
    async fn default_constructed_instances_do_not_collide() {
        let a = MemoryBackend::new();
        let b = MemoryBackend::new();
        a.set("f.txt", Content::Bytes(Bytes::from_static(b"x"))).await.unwrap();
        assert!(a.exists("f.txt").await);
        assert!(!b.exists("f.txt").await);
        assert!(a != b);
    }

    #[tokio::test]
    async fn same_root_path_shares_a_subtree() {
        let a = MemoryBackend::with_root_path("shared-root-for-test").unwrap();
        let b = MemoryBackend::with_root_path("shared-root-for-test").unwrap();
        a.set("f.txt", Content::Bytes(Bytes::from_static(b"x"))).await.unwrap();
        assert!(b.exists("f.txt").await);
        assert!(a == b);
    }

    #[tokio::test]
    async fn nested_set_creates_parent_dirs() {
        let fsys = MemoryBackend::isolated();
        fsys.set("a/b/c.txt", Content::Bytes(Bytes::from_static(b"1")))
            .await
            .unwrap();
        assert!(fsys.isdir("a").await);
        assert!(fsys.isdir("a/b").await);
        assert!(fsys.isfile("a/b/c.txt").await);
        assert_eq!(fsys.get("a/b/c.txt").await.unwrap(), Bytes::from_static(b"1"));
    }

    #[tokio::test]
    async fn rm_rejects_nonempty_dir() {
        let fsys = MemoryBackend::isolated();
        fsys.set("a/b.txt", Content::Bytes(Bytes::from_static(b"1")))
            .await
            .unwrap();
        assert!(fsys.rm("a").await.is_err());
        fsys.rm("a/b.txt").await.unwrap();
        fsys.rm("a").await.unwrap();
        assert!(!fsys.exists("a").await);
    }

    #[tokio::test]
    async fn set_over_directory_path_fails() {
        let fsys = MemoryBackend::isolated();
        fsys.set("a/b.txt", Content::Bytes(Bytes::from_static(b"1")))
            .await
            .unwrap();
        assert!(fsys.set("a", Content::Bytes(Bytes::from_static(b"2"))).await.is_err());
    }

    #[tokio::test]
    async fn listdir_recursive_and_flat() {
        let fsys = MemoryBackend::isolated();
        fsys.set("a/b.txt", Content::Bytes(Bytes::from_static(b"1")))
            .await
            .unwrap();
        fsys.set("a/c/d.txt", Content::Bytes(Bytes::from_static(b"1")))
            .await
            .unwrap();
        assert_eq!(fsys.listdir("a", false, None).await.unwrap(), vec!["a/b.txt", "a/c"]);
        let mut recursive = fsys.listdir("a", true, None).await.unwrap();
        recursive.sort();
        assert_eq!(recursive, vec!["a/b.txt", "a/c", "a/c/d.txt"]);
    }
}
