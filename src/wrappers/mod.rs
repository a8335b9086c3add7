pub mod cached;
pub mod cloning;
pub mod write_once;
pub mod write_protected;

pub use cached::CachedFileSystem;
pub use cloning::CloningFileSystem;
pub use write_once::WriteOnceFileSystem;
pub use write_protected::WriteProtectedFileSystem;
