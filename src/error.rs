// src/error.rs

use thiserror::Error;

/// Core error types for Gemvault
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing or invalid upload payload
    #[error("Invalid upload: {0}")]
    ValidationError(String),

    /// Replacement disallowed and the stored archive differs
    #[error("Conflict: {0}")]
    ConflictError(String),

    /// Archive directory missing or unwritable
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Full index rebuild failed
    #[error("Index rebuild failed: {0}")]
    IndexRebuildError(String),

    /// Gem metadata or Marshal data could not be parsed
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Archive extraction or documentation build failed
    #[error("Documentation generation failed: {0}")]
    DocGenerationError(String),

    /// Requested archive or file does not exist
    #[error("Not found: {0}")]
    NotFoundError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// The archive was written but the index could not be refreshed
    #[error("Stored {filename} but the index refresh failed: {source}")]
    IndexRefreshFailed {
        filename: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::DocGenerationError(_))
    }

    /// HTTP status a web front end should answer with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ValidationError(_) => 400,
            Self::NotFoundError(_) => 404,
            Self::ConflictError(_) => 409,
            Self::DocGenerationError(_) => 503,
            Self::Io(_)
            | Self::StorageError(_)
            | Self::IndexRebuildError(_)
            | Self::ParseError(_)
            | Self::ConfigError(_)
            | Self::IndexRefreshFailed { .. } => 500,
        }
    }
}

/// Result type alias using Gemvault's Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::ValidationError("x".into()).status_code(), 400);
        assert_eq!(Error::ConflictError("x".into()).status_code(), 409);
        assert_eq!(Error::NotFoundError("x".into()).status_code(), 404);
        assert_eq!(Error::StorageError("x".into()).status_code(), 500);
        assert_eq!(Error::DocGenerationError("x".into()).status_code(), 503);
    }

    #[test]
    fn test_refresh_failure_keeps_source() {
        let err = Error::IndexRefreshFailed {
            filename: "foo-1.0.gem".to_string(),
            source: Box::new(Error::IndexRebuildError("disk full".to_string())),
        };
        let message = err.to_string();
        assert!(message.contains("foo-1.0.gem"));
        assert!(message.contains("disk full"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_retryable() {
        assert!(Error::DocGenerationError("timeout".into()).is_retryable());
        assert!(!Error::ConflictError("differs".into()).is_retryable());
    }
}
