//! Error types for the metadata cache

use std::path::PathBuf;
use thiserror::Error;

/// Error kinds that can occur in the cache subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheErrorKind {
    /// I/O error during file operations
    IoError,
    /// File or directory not found
    NotFound,
    /// Database operation failed
    DatabaseError,
    /// Store failed its structural integrity check
    Corruption,
    /// Replication copy failed
    ReplicationError,
}

/// Represents an error raised by the cache subsystem
#[derive(Debug, Error)]
#[error("{kind:?}: {message} (path: {path:?})")]
pub struct CacheError {
    /// The kind of error
    pub kind: CacheErrorKind,
    /// The path where the error occurred
    pub path: Option<PathBuf>,
    /// Human-readable error message
    pub message: String,
}

impl CacheError {
    /// Create a new cache error
    pub fn new(kind: CacheErrorKind, path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path,
            message: message.into(),
        }
    }

    /// Create an I/O error
    pub fn io_error(path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self::new(CacheErrorKind::IoError, path, message)
    }

    /// Create a database error
    pub fn database_error(message: impl Into<String>) -> Self {
        Self::new(CacheErrorKind::DatabaseError, None, message)
    }

    /// Create a corruption error
    pub fn corruption(path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self::new(CacheErrorKind::Corruption, path, message)
    }

    /// Create a replication error
    pub fn replication(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(CacheErrorKind::ReplicationError, Some(path), message)
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => CacheErrorKind::NotFound,
            _ => CacheErrorKind::IoError,
        };
        Self::new(kind, None, err.to_string())
    }
}

impl From<rusqlite::Error> for CacheError {
    fn from(err: rusqlite::Error) -> Self {
        Self::database_error(err.to_string())
    }
}

/// Failure classification for a single media probe
///
/// Unsupported failures are permanent and cached as a negative entry;
/// I/O failures are transient and retried on the next request.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The file is not a playable video (corrupt container, no video
    /// stream, zero duration)
    #[error("unsupported media: {0}")]
    Unsupported(String),
    /// Transient I/O failure while probing
    #[error("probe I/O failure: {0}")]
    Io(String),
}

impl ProbeError {
    /// Whether the failure should be cached as a permanent negative entry
    pub fn is_permanent(&self) -> bool {
        matches!(self, ProbeError::Unsupported(_))
    }
}

impl From<std::io::Error> for ProbeError {
    fn from(err: std::io::Error) -> Self {
        ProbeError::Io(err.to_string())
    }
}
