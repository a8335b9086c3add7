//! Exercises the universal `FileSystem` contract against every backend that
//! doesn't require a live network fixture, plus the wrapper decorators
//! layered on top of them.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use bytes::Bytes;
use multistore::backends::{DiskBackend, MemoryBackend, TempDiskBackend};
use multistore::wrappers::{CachedFileSystem, CloningFileSystem, WriteOnceFileSystem, WriteProtectedFileSystem};
use multistore::{Content, FileSystem, StorageError};

fn hash_of(value: &impl Hash) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

async fn assert_basic_lifecycle(fsys: &dyn FileSystem) {
    assert!(!fsys.exists("a/b.txt").await);

    fsys.set("a/b.txt", Content::Bytes(Bytes::from_static(b"payload")))
        .await
        .unwrap();
    assert!(fsys.exists("a/b.txt").await);
    assert!(fsys.isfile("a/b.txt").await);
    assert!(fsys.isdir("a").await);
    assert_eq!(fsys.get("a/b.txt").await.unwrap(), Bytes::from_static(b"payload"));
    assert_eq!(fsys.getsize("a/b.txt").await.unwrap(), 7);

    let listed = fsys.listdir("a", false, None).await.unwrap();
    assert_eq!(listed, vec!["a/b.txt"]);

    fsys.rm("a/b.txt").await.unwrap();
    assert!(!fsys.exists("a/b.txt").await);
}

#[tokio::test]
async fn disk_backend_satisfies_basic_lifecycle() {
    let backend = TempDiskBackend::new().await.unwrap();
    assert_basic_lifecycle(&backend).await;
}

#[tokio::test]
async fn memory_backend_satisfies_basic_lifecycle() {
    let backend = MemoryBackend::isolated();
    assert_basic_lifecycle(&backend).await;
}

#[tokio::test]
async fn disk_and_memory_agree_on_empty_root() {
    let disk = TempDiskBackend::new().await.unwrap();
    let memory = MemoryBackend::isolated();

    assert!(disk.isdir("").await);
    assert!(memory.isdir("").await);
    assert_eq!(disk.listdir("", true, None).await.unwrap(), Vec::<String>::new());
    assert_eq!(memory.listdir("", true, None).await.unwrap(), Vec::<String>::new());
}

#[tokio::test]
async fn write_once_over_memory_forbids_overwrite_and_delete() {
    let back: Arc<dyn FileSystem> = Arc::new(MemoryBackend::isolated());
    let once = WriteOnceFileSystem::new(back);

    assert!(!once.is_read_only());
    once.set("f.txt", Content::Bytes(Bytes::from_static(b"1"))).await.unwrap();
    assert!(once.set("f.txt", Content::Bytes(Bytes::from_static(b"2"))).await.is_err());
    assert!(once.rm("f.txt").await.is_err());
    assert_eq!(once.get("f.txt").await.unwrap(), Bytes::from_static(b"1"));
}

#[tokio::test]
async fn backends_and_wrappers_implement_identity_consistently() {
    let root = tempfile::TempDir::new().unwrap();
    let disk_a = DiskBackend::new(root.path()).await.unwrap();
    let disk_b = DiskBackend::new(root.path()).await.unwrap();
    assert!(disk_a == disk_b);
    assert_eq!(hash_of(&disk_a), hash_of(&disk_b));

    let other_root = tempfile::TempDir::new().unwrap();
    let disk_c = DiskBackend::new(other_root.path()).await.unwrap();
    assert!(disk_a != disk_c);

    let mem_a = MemoryBackend::isolated();
    let mem_b = MemoryBackend::isolated();
    assert!(mem_a != mem_b);

    let front: Arc<dyn FileSystem> = Arc::new(MemoryBackend::isolated());
    let back: Arc<dyn FileSystem> = Arc::new(MemoryBackend::isolated());
    let cached_a = CachedFileSystem::new(front.clone(), back.clone()).unwrap();
    let cached_b = CachedFileSystem::new(front.clone(), back.clone()).unwrap();
    assert!(cached_a == cached_b);
    assert_eq!(hash_of(&cached_a), hash_of(&cached_b));

    let write_once_a = WriteOnceFileSystem::new(back.clone());
    let write_once_b = WriteOnceFileSystem::new(back.clone());
    assert!(write_once_a == write_once_b);

    let protected_a = WriteProtectedFileSystem::new(back.clone());
    let protected_b = WriteProtectedFileSystem::new(back.clone());
    assert!(protected_a == protected_b);
}

#[tokio::test]
async fn cached_existence_checks_prefer_front_over_back() {
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
}

#[tokio::test]
async fn cloning_get_returns_data_even_if_front_clone_write_fails() {
    let front: Arc<dyn FileSystem> = Arc::new(WriteProtectedFileSystem::new(Arc::new(MemoryBackend::isolated())));
    let back: Arc<dyn FileSystem> = Arc::new(MemoryBackend::isolated());
    back.set("f.txt", Content::Bytes(Bytes::from_static(b"x"))).await.unwrap();

    let cloning = CloningFileSystem::new(front, back);
    assert_eq!(cloning.get("f.txt").await.unwrap(), Bytes::from_static(b"x"));
}

#[tokio::test]
async fn write_protected_over_disk_forbids_any_mutation() {
    let disk = TempDiskBackend::new().await.unwrap();
    disk.set("f.txt", Content::Bytes(Bytes::from_static(b"1"))).await.unwrap();
    let back: Arc<dyn FileSystem> = Arc::new(disk);
    let protected = WriteProtectedFileSystem::new(back);

    assert!(protected.is_read_only());
    assert_eq!(protected.get("f.txt").await.unwrap(), Bytes::from_static(b"1"));
    assert!(protected.set("f.txt", Content::Bytes(Bytes::from_static(b"2"))).await.is_err());
    assert!(protected.rm("f.txt").await.is_err());
}

#[tokio::test]
async fn cached_over_memory_serves_stale_content_after_back_mutates() {
    let front: Arc<dyn FileSystem> = Arc::new(MemoryBackend::isolated());
    let back: Arc<dyn FileSystem> = Arc::new(MemoryBackend::isolated());
    back.set("f.txt", Content::Bytes(Bytes::from_static(b"v1"))).await.unwrap();

    let cached = CachedFileSystem::new(front, back.clone()).unwrap();
    assert_eq!(cached.get("f.txt").await.unwrap(), Bytes::from_static(b"v1"));

    back.set("f.txt", Content::Bytes(Bytes::from_static(b"v2"))).await.unwrap();
    // Stale front copy still served.
    assert_eq!(cached.get("f.txt").await.unwrap(), Bytes::from_static(b"v1"));
    // But authoritative metadata always comes from back.
    assert_eq!(cached.getsize("f.txt").await.unwrap(), 2);
}

#[tokio::test]
async fn cloning_over_disk_and_memory_replicates_on_write() {
    let front = TempDiskBackend::new().await.unwrap();
    let front: Arc<dyn FileSystem> = Arc::new(front);
    let back: Arc<dyn FileSystem> = Arc::new(MemoryBackend::isolated());
    let cloning = CloningFileSystem::new(front.clone(), back.clone());

    cloning.set("f.txt", Content::Bytes(Bytes::from_static(b"hi"))).await.unwrap();
    assert_eq!(front.get("f.txt").await.unwrap(), Bytes::from_static(b"hi"));
    assert_eq!(back.get("f.txt").await.unwrap(), Bytes::from_static(b"hi"));
}

#[tokio::test]
async fn disk_backend_rejects_path_escape() {
    let backend = TempDiskBackend::new().await.unwrap();
    assert!(!backend.exists("../../../etc/passwd").await);
    assert!(backend
        .set("../escape.txt", Content::Bytes(Bytes::from_static(b"x")))
        .await
        .is_err());
}

#[tokio::test]
async fn disk_backend_rm_rejects_nonempty_directory() {
    let backend = TempDiskBackend::new().await.unwrap();
    backend
        .set("dir/file.txt", Content::Bytes(Bytes::from_static(b"x")))
        .await
        .unwrap();
    let err = backend.rm("dir").await.unwrap_err();
    assert!(matches!(err, StorageError::DirectoryNotEmpty { .. }));
}

#[tokio::test]
async fn disk_backend_rm_of_empty_directory_succeeds() {
    let backend = TempDiskBackend::new().await.unwrap();
    backend
        .set("dir/file.txt", Content::Bytes(Bytes::from_static(b"x")))
        .await
        .unwrap();
    backend.rm("dir/file.txt").await.unwrap();
    // Now empty: must not be misclassified as DirectoryNotEmpty.
    backend.rm("dir").await.unwrap();
    assert!(!backend.exists("dir").await);
}

// Included mainly to document intent: DiskBackend can also be constructed
// directly against a caller-owned directory, not just via the TempDir helper.
#[tokio::test]
async fn disk_backend_new_creates_missing_root() {
    let dir = tempfile::TempDir::new().unwrap();
    let root = dir.path().join("nested/created/by/backend");
    let backend = DiskBackend::new(&root).await.unwrap();
    assert!(backend.isdir("").await);
}
