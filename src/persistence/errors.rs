//! Persistence errors
//!
//! Every persistence failure is fatal-class: it threatens the ability to
//! recover configuration after the next failover.

use thiserror::Error;

use crate::status::StatusCode;

/// Result type for persistence operations
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Persistence errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Checksum mismatch for key '{key}': stored {stored:#010x}, computed {computed:#010x}")]
    Corrupted {
        key: String,
        stored: u32,
        computed: u32,
    },

    #[error("Invalid key: '{0}'")]
    InvalidKey(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PersistenceError {
    pub(crate) fn io(path: &std::path::Path, err: std::io::Error) -> Self {
        PersistenceError::Io {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }

    /// Caller-visible status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            PersistenceError::InvalidKey(_) => StatusCode::InvalidInput,
            _ => StatusCode::SystemFailure,
        }
    }

    pub fn is_fatal(&self) -> bool {
        !matches!(self, PersistenceError::InvalidKey(_))
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        PersistenceError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let io = PersistenceError::Io {
            path: "/data/kv".into(),
            reason: "disk full".into(),
        };
        assert_eq!(io.status(), StatusCode::SystemFailure);
        assert!(io.is_fatal());

        let key = PersistenceError::InvalidKey("../x".into());
        assert_eq!(key.status(), StatusCode::InvalidInput);
        assert!(!key.is_fatal());

        assert_eq!(
            PersistenceError::Unavailable("down".into()).status(),
            StatusCode::SystemFailure
        );
    }

    #[test]
    fn test_corrupted_message() {
        let err = PersistenceError::Corrupted {
            key: "recovery_record".into(),
            stored: 1,
            computed: 2,
        };
        assert!(err.to_string().contains("recovery_record"));
    }
}
