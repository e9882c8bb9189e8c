//! Session participants
//!
//! Components that keep per-session candidate state (policy engine,
//! physical manager) and must hear about session lifecycle changes.

use std::sync::Mutex;

use serde::Serialize;

use super::errors::ParticipantError;
use crate::lock::ConfigMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Acquired,
    Released,
    /// Displaced by a force acquisition of the same key
    Evicted,
    CandidateAborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionNotice {
    pub kind: NoticeKind,
    pub session_id: u32,
    pub config_id: u32,
    pub mode: ConfigMode,
    pub vtn_name: Option<String>,
}

pub trait Participant: Send + Sync {
    fn name(&self) -> &str;

    fn notify(&self, notice: &SessionNotice) -> Result<(), ParticipantError>;

    /// True while this participant holds uncommitted candidate changes
    fn is_candidate_dirty(&self) -> Result<bool, ParticipantError>;
}

/// Participant that records every notice it receives
#[derive(Debug, Default)]
pub struct RecordingParticipant {
    name: String,
    notices: Mutex<Vec<SessionNotice>>,
    dirty: Mutex<bool>,
    fail_on: Mutex<Option<NoticeKind>>,
}

impl RecordingParticipant {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn notices(&self) -> Vec<SessionNotice> {
        self.notices.lock().map(|n| n.clone()).unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<NoticeKind> {
        self.notices().iter().map(|n| n.kind).collect()
    }

    pub fn set_dirty(&self, dirty: bool) {
        if let Ok(mut d) = self.dirty.lock() {
            *d = dirty;
        }
    }

    /// Refuse notices of `kind` from now on
    pub fn fail_on(&self, kind: Option<NoticeKind>) {
        if let Ok(mut f) = self.fail_on.lock() {
            *f = kind;
        }
    }
}

impl Participant for RecordingParticipant {
    fn name(&self) -> &str {
        &self.name
    }

    fn notify(&self, notice: &SessionNotice) -> Result<(), ParticipantError> {
        let refuse = self
            .fail_on
            .lock()
            .map_err(|_| ParticipantError::new(&self.name, "poisoned"))?;
        if *refuse == Some(notice.kind) {
            return Err(ParticipantError::new(&self.name, "notice refused"));
        }
        self.notices
            .lock()
            .map_err(|_| ParticipantError::new(&self.name, "poisoned"))?
            .push(notice.clone());
        Ok(())
    }

    fn is_candidate_dirty(&self) -> Result<bool, ParticipantError> {
        self.dirty
            .lock()
            .map(|d| *d)
            .map_err(|_| ParticipantError::new(&self.name, "poisoned"))
    }
}
