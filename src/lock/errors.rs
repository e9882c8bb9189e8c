//! Config lock errors

use thiserror::Error;

use crate::status::StatusCode;

/// Result type for config lock operations
pub type LockResult<T> = Result<T, LockError>;

/// Config lock errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("operation not permitted in UNC state {0}")]
    InvalidUncState(String),

    #[error("operation not allowed: {0}")]
    OperationNotAllowed(String),

    #[error("scope busy: {0}")]
    Busy(String),

    #[error("invalid session id {0}")]
    InvalidSessionId(u32),

    #[error("invalid config id {config_id} for session {session_id}")]
    InvalidConfigId { session_id: u32, config_id: u32 },

    #[error("session {0} does not hold the requested lock")]
    NotAcquired(u32),

    #[error("no config session exists for session {0}")]
    NoConfigSessionExist(u32),

    #[error("session {0} already holds a config session")]
    AlreadyAcquired(u32),

    #[error("invalid lock operation: {0}")]
    InvalidOperation(String),

    #[error("internal lock error: {0}")]
    Internal(String),
}

impl LockError {
    /// Caller-visible status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            LockError::InvalidUncState(_) => StatusCode::InvalidUncState,
            LockError::OperationNotAllowed(_) => StatusCode::OperationNotAllowed,
            LockError::Busy(_) => StatusCode::Busy,
            LockError::InvalidSessionId(_) => StatusCode::InvalidSessionId,
            LockError::InvalidConfigId { .. } => StatusCode::InvalidConfigId,
            LockError::NotAcquired(_) => StatusCode::NotAcquired,
            LockError::NoConfigSessionExist(_) => StatusCode::NoConfigSessionExist,
            LockError::AlreadyAcquired(_) => StatusCode::AlreadyAcquired,
            LockError::InvalidOperation(_) => StatusCode::InvalidOperation,
            LockError::Internal(_) => StatusCode::SystemFailure,
        }
    }

    /// Expected and retryable; never logged as a failure
    pub fn is_contention(&self) -> bool {
        self.status().is_contention()
    }

    pub(crate) fn poisoned() -> Self {
        LockError::Internal("lock table mutex poisoned".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping_table() {
        let table = [
            (LockError::InvalidUncState("SBY".into()), StatusCode::InvalidUncState),
            (
                LockError::OperationNotAllowed("x".into()),
                StatusCode::OperationNotAllowed,
            ),
            (LockError::Busy("global-mode".into()), StatusCode::Busy),
            (LockError::InvalidSessionId(1), StatusCode::InvalidSessionId),
            (
                LockError::InvalidConfigId {
                    session_id: 1,
                    config_id: 2,
                },
                StatusCode::InvalidConfigId,
            ),
            (LockError::NotAcquired(1), StatusCode::NotAcquired),
            (
                LockError::NoConfigSessionExist(1),
                StatusCode::NoConfigSessionExist,
            ),
            (LockError::AlreadyAcquired(1), StatusCode::AlreadyAcquired),
            (
                LockError::InvalidOperation("x".into()),
                StatusCode::InvalidOperation,
            ),
            (LockError::poisoned(), StatusCode::SystemFailure),
        ];

        for (error, status) in table {
            assert_eq!(error.status(), status, "{}", error);
        }
    }

    #[test]
    fn test_contention_class() {
        assert!(LockError::Busy("k".into()).is_contention());
        assert!(LockError::AlreadyAcquired(3).is_contention());
        assert!(!LockError::InvalidSessionId(3).is_contention());
    }
}
