//! Transaction errors

use thiserror::Error;

use crate::persistence::PersistenceError;
use crate::registry::{DriverType, RegistryError};
use crate::status::StatusCode;

/// Result type for transaction operations
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Failure reported by a southbound driver
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct DriverError {
    pub reason: String,
}

impl DriverError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Transaction errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    #[error("Controller disconnected: {0}")]
    CtrDisconnected(String),

    #[error("No driver registered for {0}")]
    NoDriver(DriverType),

    #[error("Driver failure on {controller}: {source}")]
    Driver {
        controller: String,
        source: DriverError,
    },

    #[error("Audit failed on {controller}: {reason}")]
    AuditFailed { controller: String, reason: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransactionError {
    pub(crate) fn driver(controller: &str, source: DriverError) -> Self {
        TransactionError::Driver {
            controller: controller.to_string(),
            source,
        }
    }

    /// Caller-visible status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            TransactionError::CtrDisconnected(_) => StatusCode::CtrDisconnected,
            TransactionError::NoDriver(_) => StatusCode::DriverFailure,
            TransactionError::Driver { .. } => StatusCode::DriverFailure,
            TransactionError::AuditFailed { .. } => StatusCode::Failure,
            TransactionError::Registry(e) => e.status(),
            TransactionError::Persistence(e) => e.status(),
            TransactionError::Internal(_) => StatusCode::SystemFailure,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, TransactionError::Persistence(e) if e.is_fatal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping_table() {
        let table = [
            (
                TransactionError::CtrDisconnected("pfc1".into()),
                StatusCode::CtrDisconnected,
            ),
            (
                TransactionError::NoDriver(DriverType::Vnp),
                StatusCode::DriverFailure,
            ),
            (
                TransactionError::driver("pfc1", DriverError::new("vote rejected")),
                StatusCode::DriverFailure,
            ),
            (
                TransactionError::AuditFailed {
                    controller: "pfc1".into(),
                    reason: "x".into(),
                },
                StatusCode::Failure,
            ),
            (
                TransactionError::Registry(RegistryError::NotFound("pfc1".into())),
                StatusCode::CtrDisconnected,
            ),
            (
                TransactionError::Persistence(PersistenceError::Unavailable("x".into())),
                StatusCode::SystemFailure,
            ),
            (
                TransactionError::Internal("x".into()),
                StatusCode::SystemFailure,
            ),
        ];

        for (error, status) in table {
            assert_eq!(error.status(), status, "{}", error);
        }
    }

    #[test]
    fn test_fatal_class() {
        assert!(TransactionError::Persistence(PersistenceError::Unavailable("x".into())).is_fatal());
        assert!(!TransactionError::CtrDisconnected("c".into()).is_fatal());
    }
}
