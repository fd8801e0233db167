//! # Storage Errors
//!
//! Backend-specific failures are classified into these kinds before they
//! cross the connector boundary, so callers see one error surface no matter
//! which backend a disk is bound to.

use thiserror::Error;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Classified storage errors
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    // Missing targets
    #[error("Not found: {path}")]
    NotFound { path: String },

    // Refused operations
    #[error("Unable to read {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("Unable to write {path}: {reason}")]
    Unwritable { path: String, reason: String },

    #[error("Unable to set visibility on {path}: {reason}")]
    UnableToSetVisibility { path: String, reason: String },

    // Mutating operation failures
    #[error("Unable to copy {from} to {to}: {reason}")]
    CopyFailed {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Unable to move {from} to {to}: {reason}")]
    MoveFailed {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Unable to delete {path}: {reason}")]
    DeleteFailed { path: String, reason: String },

    #[error("Unable to create directory {path}: {reason}")]
    DirectoryCreateFailed { path: String, reason: String },

    #[error("Unable to delete directory {path}: {reason}")]
    DirectoryDeleteFailed { path: String, reason: String },

    // Metadata
    #[error("Checksum unavailable for {path}: {reason}")]
    ChecksumUnavailable { path: String, reason: String },

    // Programming / configuration errors, never swallowed
    #[error("Unsupported operation: {operation} on {driver} disk")]
    UnsupportedOperation {
        operation: &'static str,
        driver: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Kinds that ignore the per-disk `throw` flag and always propagate.
    ///
    /// No sentinel value can represent "this disk cannot do this at all" or
    /// "this disk is misconfigured", so these bypass the fail-soft arm.
    pub fn always_raised(&self) -> bool {
        matches!(
            self,
            StorageError::UnsupportedOperation { .. }
                | StorageError::Configuration(_)
                | StorageError::InvalidPath(_)
                | StorageError::Internal(_)
        )
    }

    /// Shorthand for a not-found error at `path`
    pub fn not_found(path: impl AsRef<str>) -> Self {
        StorageError::NotFound {
            path: path.as_ref().to_string(),
        }
    }

    /// Shorthand for an unreadable error at `path`
    pub fn unreadable(path: impl AsRef<str>, reason: impl ToString) -> Self {
        StorageError::Unreadable {
            path: path.as_ref().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for an unwritable error at `path`
    pub fn unwritable(path: impl AsRef<str>, reason: impl ToString) -> Self {
        StorageError::Unwritable {
            path: path.as_ref().to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_always_raised_kinds() {
        assert!(StorageError::Configuration("bad".into()).always_raised());
        assert!(StorageError::InvalidPath("../x".into()).always_raised());
        assert!(StorageError::UnsupportedOperation {
            operation: "temporary_url",
            driver: "ftp".into(),
        }
        .always_raised());

        assert!(!StorageError::not_found("a.txt").always_raised());
        assert!(!StorageError::unwritable("a.txt", "quota").always_raised());
    }

    #[test]
    fn test_display() {
        let err = StorageError::not_found("docs/a.txt");
        assert_eq!(err.to_string(), "Not found: docs/a.txt");

        let err = StorageError::CopyFailed {
            from: "a".into(),
            to: "b".into(),
            reason: "gone".into(),
        };
        assert_eq!(err.to_string(), "Unable to copy a to b: gone");
    }
}
