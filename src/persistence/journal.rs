//! Recovery journal
//!
//! Typed accessor for the two cross-restart hints the coordinator keeps:
//! the `global-mode-dirty` flag and the recovery record left by a failed
//! global commit. Consecutive write failures are counted; reaching the
//! configured limit raises an operator alarm and moves an active node to
//! ACT_FAIL.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{PersistenceError, PersistenceResult};
use super::store::KvStore;
use crate::lock::{ConfigLock, ConfigMode, UncState, WriteType};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};

const GLOBAL_DIRTY_KEY: &str = "global_mode_dirty";
const RECOVERY_RECORD_KEY: &str = "recovery_record";

/// What was in flight when a global commit failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRecord {
    pub failed_operation: WriteType,
    pub config_mode: ConfigMode,
    pub vtn_name: Option<String>,
    pub failover_attempts: u32,
    pub recorded_at: DateTime<Utc>,
}

impl RecoveryRecord {
    pub fn new(failed_operation: WriteType, config_mode: ConfigMode, vtn_name: Option<String>) -> Self {
        Self {
            failed_operation,
            config_mode,
            vtn_name,
            failover_attempts: 0,
            recorded_at: Utc::now(),
        }
    }
}

/// Run after an escalation has moved the node to ACT_FAIL
type EscalationHook = Box<dyn Fn() + Send + Sync>;

pub struct RecoveryJournal {
    store: Arc<dyn KvStore>,
    config_lock: Arc<ConfigLock>,
    metrics: Arc<MetricsRegistry>,
    consecutive_failures: AtomicU32,
    max_failures: u32,
    on_escalation: OnceLock<EscalationHook>,
}

impl RecoveryJournal {
    pub fn new(
        store: Arc<dyn KvStore>,
        config_lock: Arc<ConfigLock>,
        metrics: Arc<MetricsRegistry>,
        max_failures: u32,
    ) -> Self {
        Self {
            store,
            config_lock,
            metrics,
            consecutive_failures: AtomicU32::new(0),
            max_failures: max_failures.max(1),
            on_escalation: OnceLock::new(),
        }
    }

    /// Install the hook run after ACT -> ACT_FAIL. Only the first one sticks.
    pub fn on_escalation(&self, hook: impl Fn() + Send + Sync + 'static) -> bool {
        self.on_escalation.set(Box::new(hook)).is_ok()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    // =========================================================================
    // GLOBAL-MODE-DIRTY FLAG
    // =========================================================================

    pub fn set_global_dirty(&self, dirty: bool) -> PersistenceResult<()> {
        let result = if dirty {
            self.store.put(GLOBAL_DIRTY_KEY, &Value::Bool(true))
        } else {
            self.store.delete(GLOBAL_DIRTY_KEY)
        };
        self.track("set_global_dirty", result)
    }

    pub fn is_global_dirty(&self) -> PersistenceResult<bool> {
        Ok(matches!(
            self.store.get(GLOBAL_DIRTY_KEY)?,
            Some(Value::Bool(true))
        ))
    }

    // =========================================================================
    // RECOVERY RECORD
    // =========================================================================

    pub fn write_record(&self, record: &RecoveryRecord) -> PersistenceResult<()> {
        let result = serde_json::to_value(record)
            .map_err(PersistenceError::from)
            .and_then(|value| self.store.put(RECOVERY_RECORD_KEY, &value));
        self.track("write_recovery_record", result)
    }

    pub fn load_record(&self) -> PersistenceResult<Option<RecoveryRecord>> {
        match self.store.get(RECOVERY_RECORD_KEY)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn clear_record(&self) -> PersistenceResult<()> {
        let result = self.store.delete(RECOVERY_RECORD_KEY);
        self.track("clear_recovery_record", result)
    }

    /// Count one more failover against the stored record.
    ///
    /// Returns the new attempt count, or `None` when there is no record.
    pub fn bump_failover_attempts(&self) -> PersistenceResult<Option<u32>> {
        let Some(mut record) = self.load_record()? else {
            return Ok(None);
        };
        record.failover_attempts = record.failover_attempts.saturating_add(1);
        self.write_record(&record)?;
        Ok(Some(record.failover_attempts))
    }

    // =========================================================================
    // FAILURE TRACKING
    // =========================================================================

    fn track<T>(&self, operation: &str, result: PersistenceResult<T>) -> PersistenceResult<T> {
        match result {
            Ok(value) => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                Ok(value)
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                self.metrics.increment_persistence_failures();
                let failures_str = failures.to_string();
                let reason = e.to_string();
                log_event_with_fields(
                    Event::PersistenceFailed,
                    &[
                        ("operation", operation),
                        ("consecutive_failures", &failures_str),
                        ("reason", &reason),
                    ],
                );
                if failures >= self.max_failures {
                    self.escalate(failures);
                }
                Err(e)
            }
        }
    }

    /// Operator alarm plus ACT -> ACT_FAIL. Requires human intervention.
    pub fn escalate(&self, failures: u32) {
        let state = self
            .config_lock
            .get_unc_current_state()
            .map(|s| s.to_string())
            .unwrap_or_else(|_| "unknown".into());
        let failures_str = failures.to_string();
        log_event_with_fields(
            Event::OperatorAlarm,
            &[("consecutive_failures", &failures_str), ("unc_state", &state)],
        );

        if let Ok(UncState::Act) = self.config_lock.get_unc_current_state() {
            if let Ok(previous) = self.config_lock.tc_update_unc_state(UncState::ActFail) {
                log_event_with_fields(
                    Event::UncStateChanged,
                    &[("from", previous.as_str()), ("to", UncState::ActFail.as_str())],
                );
                if let Some(hook) = self.on_escalation.get() {
                    hook();
                }
            }
        }
    }
}

impl std::fmt::Debug for RecoveryJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryJournal")
            .field("consecutive_failures", &self.consecutive_failures())
            .field("max_failures", &self.max_failures)
            .field("on_escalation", &self.on_escalation.get().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;

    fn journal(max_failures: u32) -> (Arc<MemoryStore>, Arc<ConfigLock>, RecoveryJournal) {
        let store = Arc::new(MemoryStore::new());
        let lock = Arc::new(ConfigLock::new(UncState::Act));
        let journal = RecoveryJournal::new(
            store.clone(),
            lock.clone(),
            Arc::new(MetricsRegistry::new()),
            max_failures,
        );
        (store, lock, journal)
    }

    #[test]
    fn test_global_dirty_flag() {
        let (_, _, journal) = journal(3);
        assert!(!journal.is_global_dirty().unwrap());
        journal.set_global_dirty(true).unwrap();
        assert!(journal.is_global_dirty().unwrap());
        journal.set_global_dirty(false).unwrap();
        assert!(!journal.is_global_dirty().unwrap());
    }

    #[test]
    fn test_record_round_trip_and_failover_count() {
        let (_, _, journal) = journal(3);
        assert_eq!(journal.bump_failover_attempts().unwrap(), None);

        let record = RecoveryRecord::new(WriteType::Commit, ConfigMode::Vtn, Some("red".into()));
        journal.write_record(&record).unwrap();
        assert_eq!(journal.load_record().unwrap(), Some(record));

        assert_eq!(journal.bump_failover_attempts().unwrap(), Some(1));
        assert_eq!(journal.bump_failover_attempts().unwrap(), Some(2));

        journal.clear_record().unwrap();
        assert_eq!(journal.load_record().unwrap(), None);
    }

    #[test]
    fn test_repeated_failures_escalate_to_act_fail() {
        let (store, lock, journal) = journal(2);
        store.set_fail_writes(true);

        assert!(journal.set_global_dirty(true).is_err());
        assert_eq!(lock.get_unc_current_state().unwrap(), UncState::Act);

        assert!(journal.set_global_dirty(true).is_err());
        assert_eq!(lock.get_unc_current_state().unwrap(), UncState::ActFail);
        assert_eq!(journal.consecutive_failures(), 2);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let (store, lock, journal) = journal(2);
        store.set_fail_writes(true);
        assert!(journal.set_global_dirty(true).is_err());

        store.set_fail_writes(false);
        journal.set_global_dirty(true).unwrap();
        assert_eq!(journal.consecutive_failures(), 0);

        store.set_fail_writes(true);
        assert!(journal.set_global_dirty(false).is_err());
        assert_eq!(lock.get_unc_current_state().unwrap(), UncState::Act);
    }

    #[test]
    fn test_escalation_runs_hook_once_per_state_change() {
        let (_, lock, journal) = journal(3);
        let runs = Arc::new(AtomicU32::new(0));
        let counter = runs.clone();
        assert!(journal.on_escalation(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(!journal.on_escalation(|| {}));

        journal.escalate(3);
        assert_eq!(lock.get_unc_current_state().unwrap(), UncState::ActFail);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // Already out of ACT: alarm only
        journal.escalate(4);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
