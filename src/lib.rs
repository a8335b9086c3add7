//! Uniform async abstraction over disk, in-memory, S3, FTP and SFTP storage,
//! with caching, cloning and write-protection wrappers composable over any
//! of them.

pub mod backends;
pub mod config;
pub mod error;
pub mod fs;
pub mod logging;
pub mod path;
pub mod retry;
pub mod stream;
pub mod wrappers;

pub use config::{parse_uri, BackendConfig};
pub use error::{StorageError, StorageResult};
pub use fs::{Content, FileEntry, FileSystem, SeekableReadStream, SeekableWriteStream, Stat};
