//! Error types for the engine.
//!
//! All errors are strongly typed using thiserror. Evaluation-path failures are
//! recovered into an [`Evaluation`](crate::resolution::Evaluation) carrying an
//! [`ErrorCode`]; fetch failures surface to whoever asked for the fetch.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by byte storage and outbox backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored bytes could not be decoded (truncated, bad checksum, bad JSON).
    #[error("Corrupted data: {0}")]
    Corrupted(String),

    /// A value could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Backend-specific failure such as a poisoned lock.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Failure reported by an upload client.
///
/// The variant decides what happens to the batch: a rejected payload is
/// deleted, a transient failure is kept for the next flush.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The backend refused the payload itself (malformed, schema violation).
    #[error("Batch rejected: {message}")]
    Rejected { message: String },

    /// Rate limiting, offline, server errors.
    #[error("Transient upload failure: {message}")]
    Transient { message: String },
}

impl UploadError {
    /// Returns true if the batch should be deleted despite the failure.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// Top-level error type.
#[derive(Debug, Error)]
pub enum ConfidenceError {
    /// Malformed flag path or undecodable payload.
    #[error("Parse error: {message}")]
    Parse { message: String },

    /// The flag is absent from the active resolution.
    #[error("Flag '{flag}' not found in local cache")]
    FlagNotFound { flag: String },

    /// The resolved value does not fit the requested type.
    #[error("Type mismatch: {message}")]
    TypeMismatch { message: String },

    /// Event data tried to set the reserved context field.
    #[error("Field 'context' is not allowed in event's data")]
    InvalidContextInMessage,

    /// Reading or writing cached state failed.
    #[error("Cache error: {message}")]
    Cache { message: String },

    /// Cached state could not be decoded.
    #[error("Corrupted cache: {message}")]
    CorruptedCache { message: String },

    /// The resolve collaborator failed.
    #[error("Resolve failed: {message}")]
    Resolve { message: String },

    /// Misconfiguration or broken invariant.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ConfidenceError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a parse error.
    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Creates a resolve error.
    #[must_use]
    pub fn resolve(message: impl Into<String>) -> Self {
        Self::Resolve {
            message: message.into(),
        }
    }

    /// Returns true if the failure came from reading or decoding cached state.
    #[must_use]
    pub const fn is_cache(&self) -> bool {
        matches!(self, Self::Cache { .. } | Self::CorruptedCache { .. })
    }

    /// Returns true if retrying the same operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Resolve { .. } | Self::Cache { .. })
    }

    /// Code reported on an evaluation that failed with this error.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::Parse { .. } => ErrorCode::ParseError,
            Self::FlagNotFound { .. } => ErrorCode::FlagNotFound,
            Self::TypeMismatch { .. } => ErrorCode::TypeMismatch,
            Self::InvalidContextInMessage => ErrorCode::InvalidContext,
            Self::Cache { .. }
            | Self::CorruptedCache { .. }
            | Self::Resolve { .. }
            | Self::Internal { .. } => ErrorCode::General,
        }
    }
}

impl From<StorageError> for ConfidenceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Corrupted(message) => Self::CorruptedCache { message },
            other => Self::Cache {
                message: other.to_string(),
            },
        }
    }
}

/// Error codes attached to evaluations that fell back to the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// No session was available to evaluate.
    ProviderNotReady,
    /// The backend rejected the context.
    InvalidContext,
    /// Unknown flag.
    FlagNotFound,
    /// Malformed flag path.
    ParseError,
    /// Value did not match the requested type.
    TypeMismatch,
    /// Any other failure.
    General,
}

/// Result type alias for engine operations.
pub type ConfidenceResult<T> = Result<T, ConfidenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_not_found_message() {
        let err = ConfidenceError::FlagNotFound {
            flag: "checkout".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("checkout"));
        assert!(msg.contains("not found"));
        assert_eq!(err.error_code(), ErrorCode::FlagNotFound);
    }

    #[test]
    fn test_storage_error_mapping() {
        let corrupted: ConfidenceError = StorageError::Corrupted("crc".into()).into();
        assert!(matches!(corrupted, ConfidenceError::CorruptedCache { .. }));
        assert!(corrupted.is_cache());

        let io: ConfidenceError =
            StorageError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone")).into();
        assert!(matches!(io, ConfidenceError::Cache { .. }));
        assert!(io.is_retryable());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ConfidenceError::parse("x").error_code(), ErrorCode::ParseError);
        assert_eq!(ConfidenceError::InvalidContextInMessage.error_code(), ErrorCode::InvalidContext);
        assert_eq!(ConfidenceError::internal("x").error_code(), ErrorCode::General);
        assert!(!ConfidenceError::internal("x").is_retryable());
        assert!(ConfidenceError::resolve("offline").is_retryable());
    }

    #[test]
    fn test_upload_error_permanence() {
        assert!(UploadError::Rejected { message: "bad".into() }.is_permanent());
        assert!(!UploadError::Transient { message: "429".into() }.is_permanent());
    }
}
