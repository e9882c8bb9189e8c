//! Controller registry errors

use thiserror::Error;

use crate::status::StatusCode;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Controller registry errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Controller not found: {0}")]
    NotFound(String),

    #[error("Controller already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid controller name: '{0}'")]
    InvalidName(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RegistryError {
    /// Caller-visible status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            RegistryError::NotFound(_) => StatusCode::CtrDisconnected,
            RegistryError::AlreadyExists(_) => StatusCode::InvalidInput,
            RegistryError::InvalidName(_) => StatusCode::InvalidInput,
            RegistryError::Internal(_) => StatusCode::SystemFailure,
        }
    }

    pub(crate) fn poisoned() -> Self {
        RegistryError::Internal("controller registry mutex poisoned".into())
    }
}
