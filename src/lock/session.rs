//! Session records held by the config lock

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::{ConfigMode, ModeKey};

/// Lock operation requested through `get_lock` / `release_lock`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockOperation {
    AcquireConfigSession,
    ForceAcquireConfigSession,
    AcquireWriteSession,
    AcquireReadSession,
    AcquireReadLockForStateTransition,
}

impl LockOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockOperation::AcquireConfigSession => "ACQUIRE_CONFIG_SESSION",
            LockOperation::ForceAcquireConfigSession => "FORCE_ACQUIRE_CONFIG_SESSION",
            LockOperation::AcquireWriteSession => "ACQUIRE_WRITE_SESSION",
            LockOperation::AcquireReadSession => "ACQUIRE_READ_SESSION",
            LockOperation::AcquireReadLockForStateTransition => {
                "ACQUIRE_READ_LOCK_FOR_STATE_TRANSITION"
            }
        }
    }
}

impl fmt::Display for LockOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sub-type of a write session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteType {
    Commit,
    AbortCandidateConfig,
    AuditUser,
    AuditDriver,
    SaveStartupConfig,
    ClearStartupConfig,
}

impl WriteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteType::Commit => "COMMIT",
            WriteType::AbortCandidateConfig => "ABORT_CANDIDATE_CONFIG",
            WriteType::AuditUser => "AUDIT_USER",
            WriteType::AuditDriver => "AUDIT_DRIVER",
            WriteType::SaveStartupConfig => "SAVE_STARTUP_CONFIG",
            WriteType::ClearStartupConfig => "CLEAR_STARTUP_CONFIG",
        }
    }

    /// Commit and abort operate on the caller's own candidate and need its
    /// config session; the rest act on the whole system.
    pub fn needs_config_session(&self) -> bool {
        matches!(self, WriteType::Commit | WriteType::AbortCandidateConfig)
    }
}

impl fmt::Display for WriteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which half of the acquire/release handshake a notify completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyKind {
    Acquire,
    Release,
}

/// Lifecycle of a config session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Granted, waiting for the acquire notify
    Acquiring,
    /// Usable for write sessions
    Active,
    /// Released, waiting for the release notify
    Releasing,
}

/// An exclusive configuration session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigSession {
    pub session_id: u32,
    pub config_id: u32,
    pub mode: ConfigMode,
    pub vtn_name: Option<String>,
    pub acquired_at: DateTime<Utc>,
    pub phase: SessionPhase,
}

impl ConfigSession {
    pub(crate) fn new(session_id: u32, config_id: u32, key: &ModeKey) -> Self {
        Self {
            session_id,
            config_id,
            mode: key.mode(),
            vtn_name: key.vtn_name().map(str::to_string),
            acquired_at: Utc::now(),
            phase: SessionPhase::Acquiring,
        }
    }

    /// True until the matching notify completes the current handshake
    pub fn notify_pending(&self) -> bool {
        self.phase != SessionPhase::Active
    }

    pub fn mode_key(&self) -> ModeKey {
        match (self.mode, self.vtn_name.as_deref()) {
            (ConfigMode::Global, _) => ModeKey::Global,
            (ConfigMode::Real, _) => ModeKey::Real,
            (ConfigMode::Virtual, _) => ModeKey::Virtual,
            (ConfigMode::Vtn, name) => ModeKey::Vtn(name.unwrap_or_default().to_string()),
        }
    }
}

/// Answer of `get_config_data`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigData {
    pub config_id: u32,
    pub mode: ConfigMode,
    pub vtn_name: Option<String>,
}

/// A session displaced by a force acquisition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictedSession {
    pub session_id: u32,
    pub config_id: u32,
}

/// Successful `get_lock` outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGrant {
    /// Config id of the (new or existing) config session, 0 when none applies
    pub config_id: u32,
    /// Previous holder, only for force acquisitions
    pub evicted: Option<EvictedSession>,
}

impl LockGrant {
    pub(crate) fn plain(config_id: u32) -> Self {
        Self {
            config_id,
            evicted: None,
        }
    }
}

/// Scope a write session excludes
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WriteScope {
    /// Commit/abort on one mode key
    Key(ModeKey),
    /// Audit and startup-config operations
    System,
}

impl WriteScope {
    /// GLOBAL-key and system writes exclude every other write; REAL, VIRTUAL
    /// and VTN writes exclude only writes on the same key.
    pub(crate) fn conflicts_with(&self, other: &WriteScope) -> bool {
        match (self, other) {
            (WriteScope::System, _) | (_, WriteScope::System) => true,
            (WriteScope::Key(a), WriteScope::Key(b)) => a.is_global() || b.is_global() || a == b,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct WriteSession {
    pub(crate) session_id: u32,
    pub(crate) write_type: WriteType,
    pub(crate) scope: WriteScope,
}
