//! Config Lock
//!
//! Single source of truth for who may configure what. All state lives in one
//! table behind one mutex; no operation here blocks beyond that mutex.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::errors::{LockError, LockResult};
use super::session::{
    ConfigData, ConfigSession, EvictedSession, LockGrant, LockOperation, NotifyKind,
    SessionPhase, WriteScope, WriteSession, WriteType,
};
use super::state::{ConfigMode, ModeKey, UncState};

#[derive(Debug)]
struct LockTable {
    unc_state: UncState,
    /// Last config id handed out. Survives state resets.
    last_config_id: u32,
    /// Config sessions by session id
    sessions: HashMap<u32, ConfigSession>,
    /// Config mode map: key -> holding session id
    modes: HashMap<ModeKey, u32>,
    writes: Vec<WriteSession>,
    reads: HashMap<u32, u32>,
    transition_reads: u32,
}

impl LockTable {
    fn new(unc_state: UncState) -> Self {
        Self {
            unc_state,
            last_config_id: 0,
            sessions: HashMap::new(),
            modes: HashMap::new(),
            writes: Vec::new(),
            reads: HashMap::new(),
            transition_reads: 0,
        }
    }

    fn require_active(&self) -> LockResult<()> {
        if self.unc_state == UncState::Act {
            Ok(())
        } else {
            Err(LockError::InvalidUncState(self.unc_state.to_string()))
        }
    }

    fn require_no_transition(&self) -> LockResult<()> {
        if self.transition_reads > 0 {
            Err(LockError::OperationNotAllowed(
                "state transition in progress".into(),
            ))
        } else {
            Ok(())
        }
    }

    fn system_write_in_progress(&self) -> bool {
        self.writes.iter().any(|w| w.scope == WriteScope::System)
    }

    fn key_has_candidate_write(&self, key: &ModeKey) -> bool {
        self.writes
            .iter()
            .any(|w| w.write_type.needs_config_session() && w.scope == WriteScope::Key(key.clone()))
    }

    fn next_config_id(&mut self) -> u32 {
        self.last_config_id = self.last_config_id.wrapping_add(1);
        if self.last_config_id == 0 {
            // 0 is reserved for audit-originated transactions
            self.last_config_id = 1;
        }
        self.last_config_id
    }

    fn grant_session(&mut self, session_id: u32, key: ModeKey) -> u32 {
        let config_id = self.next_config_id();
        self.sessions
            .insert(session_id, ConfigSession::new(session_id, config_id, &key));
        self.modes.insert(key, session_id);
        config_id
    }

    fn clear(&mut self) {
        self.sessions.clear();
        self.modes.clear();
        self.writes.clear();
        self.reads.clear();
        self.transition_reads = 0;
    }
}

/// Mutual-exclusion and session bookkeeping engine
#[derive(Debug)]
pub struct ConfigLock {
    table: Mutex<LockTable>,
}

impl Default for ConfigLock {
    fn default() -> Self {
        Self::new(UncState::Init)
    }
}

impl ConfigLock {
    /// Create a lock table starting in `initial_state`
    pub fn new(initial_state: UncState) -> Self {
        Self {
            table: Mutex::new(LockTable::new(initial_state)),
        }
    }

    fn table(&self) -> LockResult<MutexGuard<'_, LockTable>> {
        self.table.lock().map_err(|_| LockError::poisoned())
    }

    // =========================================================================
    // ACQUISITION
    // =========================================================================

    /// Acquire a config, write, read, or state-transition lock for `session_id`.
    ///
    /// `mode`/`vtn_name` only apply to config-session acquisition; a missing
    /// mode means GLOBAL. `write_type` is required for write sessions and
    /// rejected otherwise.
    pub fn get_lock(
        &self,
        session_id: u32,
        operation: LockOperation,
        write_type: Option<WriteType>,
        mode: Option<ConfigMode>,
        vtn_name: Option<&str>,
    ) -> LockResult<LockGrant> {
        let mut table = self.table()?;

        match operation {
            LockOperation::AcquireConfigSession | LockOperation::ForceAcquireConfigSession => {
                if write_type.is_some() {
                    return Err(LockError::InvalidOperation(format!(
                        "{} takes no write type",
                        operation
                    )));
                }
                let key = ModeKey::new(mode.unwrap_or(ConfigMode::Global), vtn_name)?;
                if operation == LockOperation::ForceAcquireConfigSession {
                    Self::force_acquire_config(&mut table, session_id, key)
                } else {
                    Self::acquire_config(&mut table, session_id, key)
                }
            }
            LockOperation::AcquireWriteSession => {
                let write_type = write_type.ok_or_else(|| {
                    LockError::InvalidOperation("write session requires a write type".into())
                })?;
                Self::acquire_write(&mut table, session_id, write_type)
            }
            LockOperation::AcquireReadSession => {
                table.require_active()?;
                *table.reads.entry(session_id).or_insert(0) += 1;
                Ok(LockGrant::plain(0))
            }
            LockOperation::AcquireReadLockForStateTransition => {
                if table.unc_state == UncState::Stop {
                    return Err(LockError::InvalidUncState(table.unc_state.to_string()));
                }
                if !table.writes.is_empty() {
                    return Err(LockError::Busy("write session in progress".into()));
                }
                table.transition_reads += 1;
                Ok(LockGrant::plain(0))
            }
        }
    }

    fn acquire_config(
        table: &mut LockTable,
        session_id: u32,
        key: ModeKey,
    ) -> LockResult<LockGrant> {
        table.require_active()?;
        table.require_no_transition()?;

        if table.sessions.contains_key(&session_id) {
            return Err(LockError::AlreadyAcquired(session_id));
        }
        if table.modes.contains_key(&key) {
            return Err(LockError::Busy(key.to_string()));
        }
        if table.system_write_in_progress() {
            return Err(LockError::Busy("system-wide write in progress".into()));
        }

        let config_id = table.grant_session(session_id, key);
        Ok(LockGrant::plain(config_id))
    }

    fn force_acquire_config(
        table: &mut LockTable,
        session_id: u32,
        key: ModeKey,
    ) -> LockResult<LockGrant> {
        table.require_active()?;
        table.require_no_transition()?;

        if table.sessions.contains_key(&session_id) {
            return Err(LockError::AlreadyAcquired(session_id));
        }
        if table.key_has_candidate_write(&key) {
            return Err(LockError::Busy(format!("commit/abort in progress on {}", key)));
        }
        if table.system_write_in_progress() {
            return Err(LockError::Busy("system-wide write in progress".into()));
        }

        let evicted = match table.modes.remove(&key) {
            Some(holder) => {
                let previous = table.sessions.remove(&holder);
                table.writes.retain(|w| w.session_id != holder);
                previous.map(|s| EvictedSession {
                    session_id: s.session_id,
                    config_id: s.config_id,
                })
            }
            None => None,
        };

        let config_id = table.grant_session(session_id, key);
        Ok(LockGrant { config_id, evicted })
    }

    fn acquire_write(
        table: &mut LockTable,
        session_id: u32,
        write_type: WriteType,
    ) -> LockResult<LockGrant> {
        table.require_active()?;
        table.require_no_transition()?;

        let (scope, config_id) = if write_type.needs_config_session() {
            let session = table
                .sessions
                .get(&session_id)
                .ok_or(LockError::InvalidSessionId(session_id))?;
            if session.notify_pending() {
                return Err(LockError::Busy(format!(
                    "session {} has a pending notification",
                    session_id
                )));
            }
            (WriteScope::Key(session.mode_key()), session.config_id)
        } else {
            let config_id = table
                .sessions
                .get(&session_id)
                .map(|s| s.config_id)
                .unwrap_or(0);
            (WriteScope::System, config_id)
        };

        if table
            .writes
            .iter()
            .any(|w| w.session_id == session_id && w.write_type == write_type)
        {
            return Err(LockError::AlreadyAcquired(session_id));
        }
        if let Some(existing) = table.writes.iter().find(|w| w.scope.conflicts_with(&scope)) {
            return Err(LockError::Busy(format!(
                "{} in progress for session {}",
                existing.write_type, existing.session_id
            )));
        }

        table.writes.push(WriteSession {
            session_id,
            write_type,
            scope,
        });
        Ok(LockGrant::plain(config_id))
    }

    // =========================================================================
    // RELEASE
    // =========================================================================

    /// Release a lock previously granted by `get_lock`.
    ///
    /// Releasing a config session only starts the release handshake: the
    /// session keeps its key until `notify_config_id_session_id_done(Release)`.
    pub fn release_lock(
        &self,
        session_id: u32,
        config_id: u32,
        operation: LockOperation,
        write_type: Option<WriteType>,
    ) -> LockResult<()> {
        let mut table = self.table()?;

        match operation {
            LockOperation::AcquireConfigSession | LockOperation::ForceAcquireConfigSession => {
                let has_write = table.writes.iter().any(|w| w.session_id == session_id);
                let session = table
                    .sessions
                    .get_mut(&session_id)
                    .ok_or(LockError::NoConfigSessionExist(session_id))?;
                if session.config_id != config_id {
                    return Err(LockError::InvalidConfigId {
                        session_id,
                        config_id,
                    });
                }
                if session.notify_pending() {
                    return Err(LockError::Busy(format!(
                        "session {} has a pending notification",
                        session_id
                    )));
                }
                if has_write {
                    return Err(LockError::Busy(format!(
                        "session {} holds a write session",
                        session_id
                    )));
                }
                session.phase = SessionPhase::Releasing;
                Ok(())
            }
            LockOperation::AcquireWriteSession => {
                let write_type = write_type.ok_or_else(|| {
                    LockError::InvalidOperation("write session requires a write type".into())
                })?;
                let index = table
                    .writes
                    .iter()
                    .position(|w| w.session_id == session_id && w.write_type == write_type)
                    .ok_or(LockError::NotAcquired(session_id))?;
                if write_type.needs_config_session() {
                    let owned = table
                        .sessions
                        .get(&session_id)
                        .map(|s| s.config_id == config_id)
                        .unwrap_or(false);
                    if !owned {
                        return Err(LockError::InvalidConfigId {
                            session_id,
                            config_id,
                        });
                    }
                }
                table.writes.remove(index);
                Ok(())
            }
            LockOperation::AcquireReadSession => match table.reads.get_mut(&session_id) {
                Some(count) if *count > 0 => {
                    *count -= 1;
                    if *count == 0 {
                        table.reads.remove(&session_id);
                    }
                    Ok(())
                }
                _ => Err(LockError::NotAcquired(session_id)),
            },
            LockOperation::AcquireReadLockForStateTransition => {
                if table.transition_reads == 0 {
                    return Err(LockError::NotAcquired(session_id));
                }
                table.transition_reads -= 1;
                Ok(())
            }
        }
    }

    // =========================================================================
    // HANDSHAKE & QUERIES
    // =========================================================================

    /// Complete the acquire or release handshake of a config session.
    ///
    /// Each handshake completes exactly once; a repeated notify fails.
    pub fn notify_config_id_session_id_done(
        &self,
        config_id: u32,
        session_id: u32,
        kind: NotifyKind,
    ) -> LockResult<()> {
        let mut table = self.table()?;

        let session = table
            .sessions
            .get_mut(&session_id)
            .ok_or(LockError::InvalidSessionId(session_id))?;
        if session.config_id != config_id {
            return Err(LockError::InvalidConfigId {
                session_id,
                config_id,
            });
        }

        match (kind, session.phase) {
            (NotifyKind::Acquire, SessionPhase::Acquiring) => {
                session.phase = SessionPhase::Active;
                Ok(())
            }
            (NotifyKind::Release, SessionPhase::Releasing) => {
                let key = session.mode_key();
                table.sessions.remove(&session_id);
                if table.modes.get(&key) == Some(&session_id) {
                    table.modes.remove(&key);
                }
                Ok(())
            }
            _ => Err(LockError::InvalidSessionId(session_id)),
        }
    }

    /// Config id and scope held by `session_id`
    pub fn get_config_data(&self, session_id: u32) -> LockResult<ConfigData> {
        let table = self.table()?;
        table
            .sessions
            .get(&session_id)
            .map(|s| ConfigData {
                config_id: s.config_id,
                mode: s.mode,
                vtn_name: s.vtn_name.clone(),
            })
            .ok_or(LockError::InvalidSessionId(session_id))
    }

    /// Snapshot of one config session
    pub fn session(&self, session_id: u32) -> LockResult<Option<ConfigSession>> {
        Ok(self.table()?.sessions.get(&session_id).cloned())
    }

    /// Session currently holding `key`, if any
    pub fn holder_of(&self, key: &ModeKey) -> LockResult<Option<u32>> {
        Ok(self.table()?.modes.get(key).copied())
    }

    /// Number of live config sessions
    pub fn session_count(&self) -> LockResult<usize> {
        Ok(self.table()?.sessions.len())
    }

    // =========================================================================
    // CLUSTER STATE
    // =========================================================================

    /// Move to `new_state`, returning the previous state.
    pub fn tc_update_unc_state(&self, new_state: UncState) -> LockResult<UncState> {
        let mut table = self.table()?;
        let previous = table.unc_state;
        table.unc_state = previous.transition(new_state)?;
        Ok(previous)
    }

    pub fn get_unc_current_state(&self) -> LockResult<UncState> {
        Ok(self.table()?.unc_state)
    }

    /// Drop every session, write, read, and transition lock.
    ///
    /// Config ids keep increasing across resets.
    pub fn reset_tc_global_data_on_state_transition(&self) -> LockResult<()> {
        self.table()?.clear();
        Ok(())
    }
}
