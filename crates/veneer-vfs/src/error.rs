//! Errors raised by backends.

use std::io;
use thiserror::Error;

/// Failure of a [`VfsOps`](crate::VfsOps) call. Variants carrying a
/// `String` hold the offending path.
#[derive(Debug, Error)]
pub enum VfsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// The path resolves outside the backend root, through `..` or a
    /// symlink.
    #[error("outside of backend root: {0}")]
    PathEscapesRoot(String),

    #[error("bad watch pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// The OS change-notification facility could not be set up.
    #[error("watcher: {0}")]
    Watch(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl VfsError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    pub fn path_escapes_root(path: impl Into<String>) -> Self {
        Self::PathEscapesRoot(path.into())
    }

    /// The closest `std::io` classification.
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            VfsError::NotFound(_) => io::ErrorKind::NotFound,
            VfsError::PermissionDenied(_) | VfsError::PathEscapesRoot(_) => {
                io::ErrorKind::PermissionDenied
            }
            VfsError::NotADirectory(_) => io::ErrorKind::NotADirectory,
            VfsError::IsADirectory(_) => io::ErrorKind::IsADirectory,
            VfsError::InvalidPattern { .. } => io::ErrorKind::InvalidInput,
            VfsError::Watch(_) => io::ErrorKind::Other,
            VfsError::Io(e) => e.kind(),
        }
    }

    /// True for every flavour of "this path does not exist", including a
    /// raw I/O `NotFound` surfaced by a backend.
    pub fn is_not_found(&self) -> bool {
        self.kind() == io::ErrorKind::NotFound
    }
}

impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::Io(inner) => inner,
            other => io::Error::new(other.kind(), other.to_string()),
        }
    }
}

pub type VfsResult<T> = Result<T, VfsError>;
