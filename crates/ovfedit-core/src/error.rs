//! Error types for the ovfedit core library.

use std::path::PathBuf;

/// The main error type for package-editing operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error with optional path context.
    #[error("I/O error{}: {source}", path.as_ref().map(|p| format!(" at '{}'", p.display())).unwrap_or_default())]
    Io {
        source: std::io::Error,
        path: Option<PathBuf>,
    },

    /// The input file is not a usable OVF/OVA package.
    #[error("invalid package: {message}")]
    InvalidPackage { message: String },

    /// Malformed or out-of-range input supplied by the caller.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// A referenced entity (file-id, disk, profile, network, property)
    /// does not exist in the descriptor.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// The requested change conflicts with existing descriptor content.
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// A required helper capability is unavailable.
    #[error("missing capability: {message}")]
    Capability { message: String },

    /// The caller aborted the operation, either through the cancellation
    /// token or by declining a confirmation prompt.
    #[error("operation cancelled: {message}")]
    Cancelled { message: String },

    /// An internal invariant was violated. Always a bug.
    #[error("internal error: {message}")]
    Internal { message: String },
}

/// A specialized Result type for ovfedit operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an I/O error with path context.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: Some(path.into()),
        }
    }

    /// Create an I/O error without path context.
    pub fn io_simple(source: std::io::Error) -> Self {
        Self::Io { source, path: None }
    }

    /// Create an invalid-package error.
    pub fn invalid_package(message: impl Into<String>) -> Self {
        Self::InvalidPackage {
            message: message.into(),
        }
    }

    /// Create an invalid-input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a missing-capability error.
    pub fn capability(message: impl Into<String>) -> Self {
        Self::Capability {
            message: message.into(),
        }
    }

    /// Create a cancelled error.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    /// Create an internal-invariant error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error reflects bad user input rather than an
    /// environmental or internal failure.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidPackage { .. }
                | Self::InvalidInput { .. }
                | Self::NotFound { .. }
                | Self::Conflict { .. }
                | Self::Cancelled { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::io_simple(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::io(io_err, "/path/to/pkg.ova");
        let msg = err.to_string();
        assert!(msg.contains("I/O error"));
        assert!(msg.contains("/path/to/pkg.ova"));
    }

    #[test]
    fn test_io_error_without_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::io_simple(io_err);
        let msg = err.to_string();
        assert!(msg.contains("I/O error"));
        assert!(!msg.contains("at '"));
    }

    #[test]
    fn test_invalid_package_error() {
        let err = Error::invalid_package("no .ovf member found");
        assert!(err.to_string().contains("invalid package"));
        assert!(err.to_string().contains("no .ovf member found"));
    }

    #[test]
    fn test_not_found_error() {
        let err = Error::not_found("no file with ID 'file99'");
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_user_error_classification() {
        assert!(Error::not_found("x").is_user_error());
        assert!(Error::conflict("x").is_user_error());
        assert!(Error::invalid_input("x").is_user_error());
        assert!(Error::cancelled("x").is_user_error());
        assert!(!Error::internal("x").is_user_error());
        assert!(!Error::io_simple(std::io::Error::other("x")).is_user_error());
        assert!(!Error::capability("x").is_user_error());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io { path: None, .. }));
    }
}
