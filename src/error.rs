//! Error types for the storage abstraction.
//!
//! Every backend and wrapper returns `StorageError`; variants carry enough
//! context (path, backend name, underlying cause) to log usefully without
//! string-matching a message.

use std::fmt;
use std::io;

/// Result type alias used throughout the crate.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Unified error type for storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// Underlying I/O error (syscall or transport failure) not otherwise classified.
    Io(io::Error),

    /// Path does not exist.
    NotFound { path: String, backend: String },

    /// Path exists but is not the kind of entity the operation required
    /// (e.g. `listdir` on a file, `getsize` on a directory).
    NotADirectory { path: String },

    /// Path already exists where the operation requires it to be absent.
    AlreadyExists { path: String },

    /// Directory is non-empty and the operation requires it to be empty.
    DirectoryNotEmpty { path: String },

    /// A path would resolve outside the backend's root.
    InvalidPath { path: String, reason: String },

    /// `set` was given content that is neither bytes nor a seekable stream.
    InvalidContent { message: String },

    /// A stream passed where position 0 is required was not at position 0.
    InvalidStreamPosition { message: String },

    /// A stream passed where a seekable stream is required did not support seeking.
    NotSeekable { message: String },

    /// `set`/`rm` attempted on a read-only or write-protected filesystem.
    UnsupportedOnReadOnly { operation: String },

    /// Authentication to a remote backend failed.
    AuthenticationFailed { backend: String, message: String },

    /// Could not establish or maintain a connection to a remote backend.
    ConnectionFailed { backend: String, message: String },

    /// An operation exceeded its configured socket/connection timeout.
    Timeout { operation: String, duration_secs: u64 },

    /// The retry budget for an operation was exhausted; wraps the last cause.
    ExceededRetries {
        attempts: u32,
        source: Box<StorageError>,
    },

    /// Backend-specific configuration was invalid.
    InvalidConfig { backend: String, message: String },

    /// Catch-all for a backend-reported failure with no more specific variant.
    Other { backend: String, message: String },
}

impl StorageError {
    /// Whether a generic retry loop should treat this error as transient.
    pub fn is_retriable(&self) -> bool {
        match self {
            StorageError::Timeout { .. } => true,
            StorageError::ConnectionFailed { .. } => true,
            StorageError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ),
            StorageError::ExceededRetries { .. } => false,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    pub fn not_found(path: impl Into<String>, backend: impl Into<String>) -> Self {
        StorageError::NotFound {
            path: path.into(),
            backend: backend.into(),
        }
    }

    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        StorageError::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Io(err) => write!(f, "I/O error: {}", err),
            StorageError::NotFound { path, backend } => {
                write!(f, "Path not found on {}: '{}'", backend, path)
            }
            StorageError::NotADirectory { path } => write!(f, "Not a directory '{}'", path),
            StorageError::AlreadyExists { path } => write!(f, "Path already exists: '{}'", path),
            StorageError::DirectoryNotEmpty { path } => {
                write!(f, "Directory not empty: '{}'", path)
            }
            StorageError::InvalidPath { path, reason } => {
                write!(f, "Invalid path '{}': {}", path, reason)
            }
            StorageError::InvalidContent { message } => write!(f, "Invalid content: {}", message),
            StorageError::InvalidStreamPosition { message } => {
                write!(f, "Invalid stream position: {}", message)
            }
            StorageError::NotSeekable { message } => write!(f, "Stream not seekable: {}", message),
            StorageError::UnsupportedOnReadOnly { operation } => {
                write!(f, "Read-only filesystem does not allow '{}'", operation)
            }
            StorageError::AuthenticationFailed { backend, message } => {
                write!(f, "Authentication failed for {}: {}", backend, message)
            }
            StorageError::ConnectionFailed { backend, message } => {
                write!(f, "Connection to {} failed: {}", backend, message)
            }
            StorageError::Timeout {
                operation,
                duration_secs,
            } => write!(
                f,
                "Operation '{}' timed out after {} seconds",
                operation, duration_secs
            ),
            StorageError::ExceededRetries { attempts, source } => {
                write!(f, "Exceeded {} retries: {}", attempts, source)
            }
            StorageError::InvalidConfig { backend, message } => {
                write!(f, "Invalid configuration for {}: {}", backend, message)
            }
            StorageError::Other { backend, message } => {
                write!(f, "{} error: {}", backend, message)
            }
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(err) => Some(err),
            StorageError::ExceededRetries { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound {
                path: String::new(),
                backend: "unknown".to_string(),
            },
            io::ErrorKind::AlreadyExists => StorageError::AlreadyExists { path: String::new() },
            _ => StorageError::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_retriable() {
        let err = StorageError::Timeout {
            operation: "read".into(),
            duration_secs: 10,
        };
        assert!(err.is_retriable());
    }

    #[test]
    fn not_found_is_not_retriable() {
        let err = StorageError::not_found("/a", "disk");
        assert!(!err.is_retriable());
        assert!(err.is_not_found());
    }

    #[test]
    fn exceeded_retries_wraps_cause() {
        let cause = StorageError::ConnectionFailed {
            backend: "ftp".into(),
            message: "refused".into(),
        };
        let wrapped = StorageError::ExceededRetries {
            attempts: 10,
            source: Box::new(cause),
        };
        assert!(!wrapped.is_retriable());
        assert!(wrapped.to_string().contains("Exceeded 10 retries"));
    }
}
