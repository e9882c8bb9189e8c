//! Caller-visible status codes
//!
//! Every subsystem error maps onto exactly one of these. The numeric values
//! are stable and travel in RPC responses.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status carried as the first element of every RPC response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    Success,
    Failure,
    InvalidInput,
    SystemBusy,
    StateChanged,
    InvalidUncState,
    OperationNotAllowed,
    Busy,
    InvalidSessionId,
    InvalidConfigId,
    NotAcquired,
    NoConfigSessionExist,
    AlreadyAcquired,
    InvalidOperation,
    CtrDisconnected,
    DriverFailure,
    SystemFailure,
    ServiceNotSupported,
}

impl StatusCode {
    /// Stable numeric code
    pub fn code(&self) -> u16 {
        match self {
            StatusCode::Success => 0,
            StatusCode::Failure => 1,
            StatusCode::InvalidInput => 2,
            StatusCode::SystemBusy => 3,
            StatusCode::StateChanged => 4,
            StatusCode::InvalidUncState => 5,
            StatusCode::OperationNotAllowed => 6,
            StatusCode::Busy => 7,
            StatusCode::InvalidSessionId => 8,
            StatusCode::InvalidConfigId => 9,
            StatusCode::NotAcquired => 10,
            StatusCode::NoConfigSessionExist => 11,
            StatusCode::AlreadyAcquired => 12,
            StatusCode::InvalidOperation => 13,
            StatusCode::CtrDisconnected => 14,
            StatusCode::DriverFailure => 15,
            StatusCode::SystemFailure => 16,
            StatusCode::ServiceNotSupported => 17,
        }
    }

    pub fn is_success(&self) -> bool {
        *self == StatusCode::Success
    }

    /// Expected, retryable outcomes of competing for a scope
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            StatusCode::Busy
                | StatusCode::SystemBusy
                | StatusCode::AlreadyAcquired
                | StatusCode::NotAcquired
        )
    }

    /// Outcomes caused by the cluster role changing under the caller
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            StatusCode::InvalidUncState | StatusCode::StateChanged | StatusCode::OperationNotAllowed
        )
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_unique() {
        let all = [
            StatusCode::Success,
            StatusCode::Failure,
            StatusCode::InvalidInput,
            StatusCode::SystemBusy,
            StatusCode::StateChanged,
            StatusCode::InvalidUncState,
            StatusCode::OperationNotAllowed,
            StatusCode::Busy,
            StatusCode::InvalidSessionId,
            StatusCode::InvalidConfigId,
            StatusCode::NotAcquired,
            StatusCode::NoConfigSessionExist,
            StatusCode::AlreadyAcquired,
            StatusCode::InvalidOperation,
            StatusCode::CtrDisconnected,
            StatusCode::DriverFailure,
            StatusCode::SystemFailure,
            StatusCode::ServiceNotSupported,
        ];
        let mut codes: Vec<u16> = all.iter().map(StatusCode::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
    }

    #[test]
    fn test_display_uses_wire_name() {
        assert_eq!(StatusCode::InvalidUncState.to_string(), "INVALID_UNC_STATE");
        assert_eq!(StatusCode::CtrDisconnected.to_string(), "CTR_DISCONNECTED");
    }

    #[test]
    fn test_classes() {
        assert!(StatusCode::Busy.is_contention());
        assert!(StatusCode::StateChanged.is_state_error());
        assert!(!StatusCode::InvalidInput.is_contention());
        assert!(StatusCode::Success.is_success());
    }
}
