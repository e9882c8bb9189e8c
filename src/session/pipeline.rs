//! Request phase pipeline
//!
//! Every session request runs the same fixed sequence:
//! INPUT_VALIDATION → GET_EXCLUSION → CREATE_MSG_LIST → EXECUTE → RELEASE_EXCLUSION.
//! The first failing phase short-circuits to `revoke` and its error is the
//! response.

use std::fmt;

use super::errors::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    InputValidation,
    GetExclusion,
    CreateMsgList,
    Execute,
    ReleaseExclusion,
}

impl Phase {
    /// Phases in execution order
    pub fn steps() -> &'static [Phase] {
        &[
            Phase::InputValidation,
            Phase::GetExclusion,
            Phase::CreateMsgList,
            Phase::Execute,
            Phase::ReleaseExclusion,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::InputValidation => "INPUT_VALIDATION",
            Phase::GetExclusion => "GET_EXCLUSION",
            Phase::CreateMsgList => "CREATE_MSG_LIST",
            Phase::Execute => "EXECUTE",
            Phase::ReleaseExclusion => "RELEASE_EXCLUSION",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A request that can be driven through the phases
pub trait Operation {
    type Output;

    fn validate(&mut self) -> Result<(), SessionError>;

    fn get_exclusion(&mut self) -> Result<(), SessionError>;

    fn create_msg_list(&mut self) -> Result<(), SessionError> {
        Ok(())
    }

    fn execute(&mut self) -> Result<(), SessionError>;

    fn release_exclusion(&mut self) -> Result<(), SessionError> {
        Ok(())
    }

    /// Undo whatever exclusion is held after `failed` returned an error
    fn revoke(&mut self, failed: Phase);

    fn into_output(self) -> Self::Output;
}

/// Error of the phase that stopped the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseFailure {
    pub phase: Phase,
    pub error: SessionError,
}

pub fn run_phases<O: Operation>(mut op: O) -> Result<O::Output, PhaseFailure> {
    for &phase in Phase::steps() {
        let result = match phase {
            Phase::InputValidation => op.validate(),
            Phase::GetExclusion => op.get_exclusion(),
            Phase::CreateMsgList => op.create_msg_list(),
            Phase::Execute => op.execute(),
            Phase::ReleaseExclusion => op.release_exclusion(),
        };

        if let Err(error) = result {
            // Nothing is held before validation passes
            if phase != Phase::InputValidation {
                op.revoke(phase);
            }
            return Err(PhaseFailure { phase, error });
        }
    }

    Ok(op.into_output())
}
