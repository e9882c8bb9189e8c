//! Coordinator context
//!
//! One explicit owner for every piece of shared coordinator state: the lock
//! table, the acquisition queue, the controller registry, drivers, command
//! cache and recovery journal. Built once at startup and handed to every
//! component by `Arc`.
//!
//! Also the target of the cluster-membership callback (`transition`).

use std::sync::Arc;

use crate::lock::{ConfigLock, LockError, LockOperation, UncState};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};
use crate::persistence::{KvStore, RecoveryJournal};
use crate::registry::{ControllerInfo, ControllerRegistry, DriverType, RegistryError};
use crate::session::{ConfigSessionCoordinator, Participant, SessionError, SessionResult};
use crate::transaction::{CommandCache, CommandEntry, DriverTable, TransactionCoordinator};

/// Session id used for coordinator-originated locks
pub const INTERNAL_SESSION_ID: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextSettings {
    /// Role entered by `start`
    pub initial_state: UncState,
    pub max_persist_failures: u32,
    pub max_failover_attempts: u32,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            initial_state: UncState::Act,
            max_persist_failures: 3,
            max_failover_attempts: 3,
        }
    }
}

pub struct CoordinatorContext {
    settings: ContextSettings,
    config_lock: Arc<ConfigLock>,
    sessions: Arc<ConfigSessionCoordinator>,
    transactions: Arc<TransactionCoordinator>,
    registry: Arc<ControllerRegistry>,
    drivers: Arc<DriverTable>,
    cache: Arc<CommandCache>,
    journal: Arc<RecoveryJournal>,
    metrics: Arc<MetricsRegistry>,
}

impl CoordinatorContext {
    /// Wire every component. The cluster role stays INIT until `start`.
    pub fn new(store: Arc<dyn KvStore>, settings: ContextSettings) -> Self {
        let metrics = Arc::new(MetricsRegistry::new());
        let config_lock = Arc::new(ConfigLock::new(UncState::Init));
        let journal = Arc::new(RecoveryJournal::new(
            store,
            config_lock.clone(),
            metrics.clone(),
            settings.max_persist_failures,
        ));
        let registry = Arc::new(ControllerRegistry::new());
        let drivers = Arc::new(DriverTable::new());
        let cache = Arc::new(CommandCache::new());

        let sessions = Arc::new(ConfigSessionCoordinator::new(
            config_lock.clone(),
            journal.clone(),
            metrics.clone(),
        ));
        // Weak: the coordinator already owns the journal
        let escalated = Arc::downgrade(&sessions);
        journal.on_escalation(move || {
            if let Some(sessions) = escalated.upgrade() {
                let _ = sessions.clear_config_acquisition_queue();
            }
        });
        let transactions = Arc::new(TransactionCoordinator::new(
            registry.clone(),
            drivers.clone(),
            cache.clone(),
            journal.clone(),
            metrics.clone(),
        ));

        Self {
            settings,
            config_lock,
            sessions,
            transactions,
            registry,
            drivers,
            cache,
            journal,
            metrics,
        }
    }

    pub fn settings(&self) -> &ContextSettings {
        &self.settings
    }

    pub fn config_lock(&self) -> &Arc<ConfigLock> {
        &self.config_lock
    }

    pub fn sessions(&self) -> &Arc<ConfigSessionCoordinator> {
        &self.sessions
    }

    pub fn transactions(&self) -> &Arc<TransactionCoordinator> {
        &self.transactions
    }

    pub fn registry(&self) -> &Arc<ControllerRegistry> {
        &self.registry
    }

    pub fn drivers(&self) -> &Arc<DriverTable> {
        &self.drivers
    }

    pub fn command_cache(&self) -> &Arc<CommandCache> {
        &self.cache
    }

    pub fn journal(&self) -> &Arc<RecoveryJournal> {
        &self.journal
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn register_participant(&self, participant: Arc<dyn Participant>) -> SessionResult<()> {
        self.sessions.register_participant(participant)
    }

    pub fn unc_state(&self) -> SessionResult<UncState> {
        Ok(self.config_lock.get_unc_current_state()?)
    }

    // =========================================================================
    // CLUSTER MEMBERSHIP
    // =========================================================================

    /// Enter the configured initial role
    pub fn start(&self) -> SessionResult<UncState> {
        self.transition(self.settings.initial_state)
    }

    /// Cluster-membership callback. Returns the previous role.
    ///
    /// Any role other than ACT cancels every queued acquisition, including
    /// ACT_FAIL -> STOP after an escalation. Entering ACT, SBY or
    /// STOP drops all sessions. Entering ACT with an outstanding recovery
    /// record counts one more failover against it.
    pub fn transition(&self, new_state: UncState) -> SessionResult<UncState> {
        let lock = &self.config_lock;
        let current = lock.get_unc_current_state()?;
        if current == new_state {
            return Ok(current);
        }
        current.transition(new_state)?;

        // A shutdown must not wait for an in-flight write
        let held = match lock.get_lock(
            INTERNAL_SESSION_ID,
            LockOperation::AcquireReadLockForStateTransition,
            None,
            None,
            None,
        ) {
            Ok(_) => true,
            Err(LockError::Busy(_)) if new_state == UncState::Stop => false,
            Err(e) => return Err(e.into()),
        };

        let updated = lock.tc_update_unc_state(new_state);
        if held {
            lock.release_lock(
                INTERNAL_SESSION_ID,
                0,
                LockOperation::AcquireReadLockForStateTransition,
                None,
            )?;
        }
        let previous = updated?;
        log_event_with_fields(
            Event::UncStateChanged,
            &[("from", previous.as_str()), ("to", new_state.as_str())],
        );

        if new_state != UncState::Act {
            self.sessions.clear_config_acquisition_queue()?;
        }
        if new_state.resets_global_data() {
            lock.reset_tc_global_data_on_state_transition()?;
            log_event_with_fields(Event::GlobalDataReset, &[("state", new_state.as_str())]);
        }
        if new_state == UncState::Act {
            self.check_recovery_record();
        }

        Ok(previous)
    }

    fn check_recovery_record(&self) {
        let record = match self.journal.load_record() {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                let reason = e.to_string();
                log_event_with_fields(
                    Event::PersistenceFailed,
                    &[("operation", "load_recovery_record"), ("reason", &reason)],
                );
                return;
            }
        };

        let attempts = match self.journal.bump_failover_attempts() {
            Ok(Some(attempts)) => attempts,
            // Write failures are counted and escalated by the journal
            _ => record.failover_attempts,
        };
        let attempts_str = attempts.to_string();
        log_event_with_fields(
            Event::RecoveryRecordFound,
            &[
                ("config_mode", record.config_mode.as_str()),
                ("failed_operation", record.failed_operation.as_str()),
                ("failover_attempts", &attempts_str),
                ("vtn_name", record.vtn_name.as_deref().unwrap_or("")),
            ],
        );

        if attempts > self.settings.max_failover_attempts {
            self.journal.escalate(attempts);
        }
    }

    /// Move to STOP, waking every waiter
    pub fn shutdown(&self) -> SessionResult<()> {
        log_event_with_fields(Event::ShutdownStart, &[]);
        self.transition(UncState::Stop)?;
        log_event_with_fields(Event::ShutdownComplete, &[]);
        Ok(())
    }

    // =========================================================================
    // CONTROLLER ADMINISTRATION
    // =========================================================================

    pub fn add_controller(&self, name: &str, driver_type: DriverType) -> SessionResult<()> {
        Ok(self.registry.add(name, driver_type)?)
    }

    pub fn update_controller(&self, name: &str, driver_type: DriverType) -> SessionResult<()> {
        Ok(self.registry.update(name, driver_type)?)
    }

    /// Waits for in-flight access, then drops the controller and its
    /// pending commands
    pub fn delete_controller(&self, name: &str) -> SessionResult<()> {
        self.registry.delete(name)?;
        self.cache.discard(name)?;
        Ok(())
    }

    pub fn list_controllers(&self) -> SessionResult<Vec<ControllerInfo>> {
        Ok(self.registry.list()?)
    }

    pub fn controller_status(&self, name: &str) -> SessionResult<ControllerInfo> {
        Ok(self.registry.status(name)?)
    }

    /// Queue a command for a controller whose driver applies from cache
    pub fn enqueue_command(&self, controller: &str, entry: CommandEntry) -> SessionResult<()> {
        let info = self.registry.status(controller)?;
        let driver = self.drivers.get(info.driver_type)?;
        if driver.is_two_phase_commit_needed() {
            return Err(SessionError::InvalidInput(format!(
                "controller {} votes through its driver and takes no cached commands",
                controller
            )));
        }
        if !self.registry.contains(controller)? {
            return Err(RegistryError::NotFound(controller.to_string()).into());
        }
        self.cache.enqueue(controller, entry)?;
        Ok(())
    }
}

impl std::fmt::Debug for CoordinatorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorContext")
            .field("settings", &self.settings)
            .field("unc_state", &self.config_lock.get_unc_current_state().ok())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{ConfigMode, WriteType};
    use crate::persistence::{MemoryStore, RecoveryRecord};
    use crate::rpc::RpcArg;
    use crate::status::StatusCode;
    use crate::transaction::{CommandOp, ConfigObject, LoopbackDriver};
    use std::thread;
    use std::time::Duration;

    fn context_with(store: Arc<MemoryStore>, settings: ContextSettings) -> CoordinatorContext {
        let context = CoordinatorContext::new(store, settings);
        context.start().unwrap();
        context
    }

    fn context() -> CoordinatorContext {
        context_with(Arc::new(MemoryStore::new()), ContextSettings::default())
    }

    fn acquire_args(session_id: u32) -> Vec<RpcArg> {
        vec![RpcArg::U32(session_id), RpcArg::U8(0)]
    }

    #[test]
    fn test_start_enters_initial_state() {
        let store = Arc::new(MemoryStore::new());
        let context = CoordinatorContext::new(store, ContextSettings::default());
        assert_eq!(context.unc_state().unwrap(), UncState::Init);
        assert_eq!(context.start().unwrap(), UncState::Init);
        assert_eq!(context.unc_state().unwrap(), UncState::Act);
    }

    #[test]
    fn test_same_state_is_noop() {
        let context = context();
        context.sessions().handle_config(&acquire_args(10)).unwrap();
        assert_eq!(context.transition(UncState::Act).unwrap(), UncState::Act);
        assert_eq!(context.config_lock().session_count().unwrap(), 1);
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let context = context();
        context.shutdown().unwrap();
        let err = context.transition(UncState::Act).unwrap_err();
        assert_eq!(err.status(), StatusCode::InvalidUncState);
    }

    #[test]
    fn test_standby_resets_sessions() {
        let context = context();
        context.sessions().handle_config(&acquire_args(10)).unwrap();
        assert_eq!(context.transition(UncState::Sby).unwrap(), UncState::Act);
        assert_eq!(context.config_lock().session_count().unwrap(), 0);

        let err = context.sessions().handle_config(&acquire_args(11)).unwrap_err();
        assert_eq!(err.status(), StatusCode::InvalidUncState);
    }

    #[test]
    fn test_stop_wakes_unbounded_waiter() {
        let context = Arc::new(context());
        context.sessions().handle_config(&acquire_args(10)).unwrap();

        let waiter = {
            let context = context.clone();
            thread::spawn(move || {
                context
                    .sessions()
                    .handle_config(&[RpcArg::U32(11), RpcArg::U8(3), RpcArg::I32(-1)])
            })
        };
        while context.sessions().queue().is_empty().unwrap() {
            thread::sleep(Duration::from_millis(1));
        }

        context.shutdown().unwrap();
        let err = waiter.join().unwrap().unwrap_err();
        assert_eq!(err.status(), StatusCode::StateChanged);
    }

    #[test]
    fn test_escalation_wakes_waiter_before_stop() {
        let context = Arc::new(context());
        context.sessions().handle_config(&acquire_args(10)).unwrap();

        let waiter = {
            let context = context.clone();
            thread::spawn(move || {
                context
                    .sessions()
                    .handle_config(&[RpcArg::U32(11), RpcArg::U8(3), RpcArg::I32(-1)])
            })
        };
        while context.sessions().queue().is_empty().unwrap() {
            thread::sleep(Duration::from_millis(1));
        }

        context.journal().escalate(3);
        assert_eq!(context.unc_state().unwrap(), UncState::ActFail);
        let err = waiter.join().unwrap().unwrap_err();
        assert_eq!(err.status(), StatusCode::StateChanged);
        assert!(context.sessions().queue().is_empty().unwrap());

        context.shutdown().unwrap();
        assert_eq!(context.unc_state().unwrap(), UncState::Stop);
    }

    #[test]
    fn test_failover_counts_against_recovery_record() {
        let store = Arc::new(MemoryStore::new());
        let settings = ContextSettings {
            max_failover_attempts: 1,
            ..Default::default()
        };
        let context = context_with(store.clone(), settings);
        context
            .journal()
            .write_record(&RecoveryRecord::new(WriteType::Commit, ConfigMode::Global, None))
            .unwrap();

        context.transition(UncState::Sby).unwrap();
        context.transition(UncState::Act).unwrap();
        assert_eq!(
            context.journal().load_record().unwrap().unwrap().failover_attempts,
            1
        );
        assert_eq!(context.unc_state().unwrap(), UncState::Act);

        context.transition(UncState::Sby).unwrap();
        context.transition(UncState::Act).unwrap();
        assert_eq!(context.unc_state().unwrap(), UncState::ActFail);
    }

    #[test]
    fn test_controller_admin() {
        let context = context();
        let vnp = Arc::new(LoopbackDriver::new(DriverType::Vnp, false));
        context.drivers().register_loopback(vnp).unwrap();
        let pfc = Arc::new(LoopbackDriver::new(DriverType::Pfc, true));
        context.drivers().register_loopback(pfc).unwrap();

        context.add_controller("vnp1", DriverType::Vnp).unwrap();
        context.add_controller("pfc1", DriverType::Pfc).unwrap();
        let err = context.add_controller("vnp1", DriverType::Vnp).unwrap_err();
        assert_eq!(err.status(), StatusCode::InvalidInput);

        let entry = CommandEntry::new(
            CommandOp::Create,
            ConfigObject::Vtn {
                vtn_name: "red".into(),
                description: None,
            },
        );
        context.enqueue_command("vnp1", entry.clone()).unwrap();
        assert_eq!(context.command_cache().len("vnp1").unwrap(), 1);

        let err = context.enqueue_command("pfc1", entry.clone()).unwrap_err();
        assert_eq!(err.status(), StatusCode::InvalidInput);
        let err = context.enqueue_command("ghost", entry).unwrap_err();
        assert_eq!(err.status(), StatusCode::CtrDisconnected);

        context.delete_controller("vnp1").unwrap();
        assert_eq!(context.command_cache().len("vnp1").unwrap(), 0);
        let names: Vec<String> = context
            .list_controllers()
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["pfc1".to_string()]);
    }
}
