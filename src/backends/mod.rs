pub mod disk;
pub mod ftp;
pub mod memory;
pub mod s3;
pub mod sftp;

pub use disk::{DiskBackend, TempDiskBackend};
pub use ftp::{FtpBackend, FtpConfig};
pub use memory::MemoryBackend;
pub use s3::S3Backend;
pub use sftp::{SftpBackend, SftpConfig};
