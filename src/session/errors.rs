//! Session coordinator errors

use thiserror::Error;

use crate::lock::LockError;
use crate::persistence::PersistenceError;
use crate::registry::RegistryError;
use crate::status::StatusCode;
use crate::transaction::TransactionError;

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Failure reported by a participant (policy engine, physical manager)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("participant {participant}: {reason}")]
pub struct ParticipantError {
    pub participant: String,
    pub reason: String,
}

impl ParticipantError {
    pub fn new(participant: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            participant: participant.into(),
            reason: reason.into(),
        }
    }
}

/// Session coordinator errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("System busy: {0}")]
    SystemBusy(String),

    #[error("UNC state changed while waiting")]
    StateChanged,

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Participant(#[from] ParticipantError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Caller-visible status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            SessionError::InvalidInput(_) => StatusCode::InvalidInput,
            SessionError::SystemBusy(_) => StatusCode::SystemBusy,
            SessionError::StateChanged => StatusCode::StateChanged,
            SessionError::Lock(e) => e.status(),
            SessionError::Persistence(_) => StatusCode::SystemFailure,
            SessionError::Transaction(e) => e.status(),
            SessionError::Registry(e) => e.status(),
            SessionError::Participant(_) => StatusCode::Failure,
            SessionError::Internal(_) => StatusCode::SystemFailure,
        }
    }

    /// Expected and retryable; logged at TRACE only
    pub fn is_contention(&self) -> bool {
        self.status().is_contention()
    }

    pub fn is_state_error(&self) -> bool {
        self.status().is_state_error()
    }

    pub fn is_fatal(&self) -> bool {
        match self {
            SessionError::Persistence(e) => e.is_fatal(),
            SessionError::Transaction(e) => e.is_fatal(),
            _ => false,
        }
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        SessionError::Internal(format!("{} mutex poisoned", what))
    }
}
