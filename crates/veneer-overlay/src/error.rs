//! Overlay error types.

use std::io;
use thiserror::Error;
use veneer_vfs::VfsError;

/// Errors raised synchronously by caller-driven overlay operations.
///
/// Refreshes never produce these; their failures are reported as
/// [`RefreshOutcome`](crate::RefreshOutcome) instead.
#[derive(Debug, Error)]
pub enum OverlayError {
    /// The source namespace has no file at this path.
    #[error("not found in source: {0}")]
    NotFound(String),

    /// Malformed path or other unusable argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The path is already materialized with different options.
    #[error("already materialized with different options: {0}")]
    AlreadyMaterialized(String),

    /// A declarative transform could not be built.
    #[error("invalid transform: {0}")]
    InvalidTransform(String),

    /// The namespace has been torn down.
    #[error("overlay namespace is torn down")]
    Closed,

    /// Configuration could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),

    /// Error from the source namespace.
    #[error(transparent)]
    Vfs(VfsError),

    /// I/O error on the staging area.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl OverlayError {
    /// Create an InvalidArgument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an InvalidTransform error.
    pub fn invalid_transform(msg: impl Into<String>) -> Self {
        Self::InvalidTransform(msg.into())
    }
}

impl From<VfsError> for OverlayError {
    fn from(e: VfsError) -> Self {
        if e.is_not_found() {
            return OverlayError::NotFound(e.to_string());
        }
        match e {
            VfsError::IsADirectory(path) => {
                OverlayError::InvalidArgument(format!("{path} is a directory"))
            }
            VfsError::PathEscapesRoot(path) => {
                OverlayError::InvalidArgument(format!("{path} is outside the source root"))
            }
            other => OverlayError::Vfs(other),
        }
    }
}

impl From<toml::de::Error> for OverlayError {
    fn from(e: toml::de::Error) -> Self {
        OverlayError::Config(e.to_string())
    }
}

/// Overlay result type.
pub type OverlayResult<T> = Result<T, OverlayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vfs_not_found_maps_to_not_found() {
        let err: OverlayError = VfsError::not_found("index.html").into();
        assert!(matches!(err, OverlayError::NotFound(_)));

        let err: OverlayError = VfsError::Io(io::Error::from(io::ErrorKind::NotFound)).into();
        assert!(matches!(err, OverlayError::NotFound(_)));
    }

    #[test]
    fn test_vfs_directory_maps_to_invalid_argument() {
        let err: OverlayError = VfsError::is_a_directory("assets").into();
        assert!(matches!(err, OverlayError::InvalidArgument(_)));
    }

    #[test]
    fn test_other_vfs_errors_pass_through() {
        let err: OverlayError = VfsError::Watch("inotify limit".into()).into();
        assert!(matches!(err, OverlayError::Vfs(VfsError::Watch(_))));
    }
}
