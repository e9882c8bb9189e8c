//! Audit pipeline
//!
//! Reconciles one controller after it reconnects. The controller is
//! unaudited from the moment an audit starts; only a successful end sets
//! `audit_result` again, which re-opens it to ordinary commits.

use serde::Serialize;

use super::coordinator::{CommitBatch, CommitOutcome, TransactionCoordinator};
use super::driver::PhysicalSnapshot;
use super::errors::{TransactionError, TransactionResult};
use crate::observability::{log_event_with_fields, Event};
use crate::registry::{AccessMode, ConnectionStatus};
use crate::status::StatusCode;

/// Who asked for the audit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditType {
    /// Operator-requested
    User,
    /// Triggered by a controller reconnecting
    Driver,
}

impl AuditType {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(AuditType::User),
            1 => Some(AuditType::Driver),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditType::User => "USER",
            AuditType::Driver => "DRIVER",
        }
    }
}

impl TransactionCoordinator {
    /// Begin an audit: mark the controller unaudited and cache its
    /// physical configuration.
    pub fn handle_audit_start(&self, controller: &str, audit_type: AuditType) -> TransactionResult<()> {
        let mut access = self.registry.acquire(controller, AccessMode::Write)?;
        access.set_audit_result(false)?;

        log_event_with_fields(
            Event::AuditStart,
            &[("controller", controller), ("audit_type", audit_type.as_str())],
        );

        if access.info().connection_status != ConnectionStatus::Up {
            return Err(TransactionError::CtrDisconnected(controller.to_string()));
        }

        let driver = self.drivers.get(access.info().driver_type)?;
        let snapshot = driver
            .fetch_physical_config(controller)
            .map_err(|e| TransactionError::AuditFailed {
                controller: controller.to_string(),
                reason: e.reason,
            })?;
        drop(access);

        self.snapshots
            .lock()
            .map_err(|_| TransactionError::Internal("snapshot table mutex poisoned".into()))?
            .insert(controller.to_string(), snapshot);
        Ok(())
    }

    /// Vote and global commit for one controller under config id 0.
    ///
    /// A skipped controller fails the audit; a failed phase aborts it.
    pub fn handle_audit_transaction(&self, controller: &str) -> CommitOutcome {
        let mut batch = CommitBatch::new(0, vec![controller.to_string()]);

        let committed = self.handle_commit_vote_request(&mut batch)
            && self.handle_commit_global_commit(&mut batch);
        if !committed {
            self.handle_global_abort(&mut batch);
        }

        let mut outcome = batch.into_outcome();
        if outcome.is_success() && !outcome.skipped().is_empty() {
            outcome.status = StatusCode::CtrDisconnected;
        }
        outcome
    }

    /// Finish an audit. Success re-opens the controller to commits and
    /// drops the cached snapshot.
    pub fn handle_audit_end(&self, controller: &str, success: bool) -> TransactionResult<()> {
        if !success {
            self.metrics.increment_audits_failed();
            log_event_with_fields(Event::AuditFailed, &[("controller", controller)]);
            return Ok(());
        }

        let mut access = self.registry.acquire(controller, AccessMode::Write)?;
        access.set_audit_result(true)?;
        drop(access);

        self.snapshots
            .lock()
            .map_err(|_| TransactionError::Internal("snapshot table mutex poisoned".into()))?
            .remove(controller);

        self.metrics.increment_audits_succeeded();
        log_event_with_fields(Event::AuditComplete, &[("controller", controller)]);
        Ok(())
    }

    /// Acknowledge a cancelled audit; no state changes.
    pub fn handle_audit_cancel(&self, controller: &str) -> TransactionResult<()> {
        log_event_with_fields(Event::AuditCancelled, &[("controller", controller)]);
        Ok(())
    }

    /// Start, transact, and end an audit of one controller.
    pub fn run_audit(&self, controller: &str, audit_type: AuditType) -> TransactionResult<CommitOutcome> {
        if let Err(e) = self.handle_audit_start(controller, audit_type) {
            self.handle_audit_end(controller, false)?;
            return Err(e);
        }

        let outcome = self.handle_audit_transaction(controller);
        self.handle_audit_end(controller, outcome.is_success())?;
        Ok(outcome)
    }

    /// Physical configuration cached by an audit still in progress or failed
    pub fn physical_snapshot(&self, controller: &str) -> Option<PhysicalSnapshot> {
        self.snapshots
            .lock()
            .ok()
            .and_then(|snapshots| snapshots.get(controller).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{ConfigLock, ConfigMode, UncState, WriteType};
    use crate::observability::MetricsRegistry;
    use crate::persistence::{MemoryStore, RecoveryJournal};
    use crate::registry::{ControllerRegistry, DriverType};
    use crate::transaction::{CommandCache, CommitScope, DriverTable, LoopbackDriver};
    use std::sync::Arc;

    fn coordinator() -> (TransactionCoordinator, Arc<LoopbackDriver>) {
        let registry = Arc::new(ControllerRegistry::new());
        registry.add("c1", DriverType::Pfc).unwrap();
        let drivers = Arc::new(DriverTable::new());
        let pfc = Arc::new(LoopbackDriver::new(DriverType::Pfc, true));
        drivers.register_loopback(pfc.clone()).unwrap();

        let metrics = Arc::new(MetricsRegistry::new());
        let journal = Arc::new(RecoveryJournal::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ConfigLock::new(UncState::Act)),
            metrics.clone(),
            3,
        ));
        (
            TransactionCoordinator::new(registry, drivers, Arc::new(CommandCache::new()), journal, metrics),
            pfc,
        )
    }

    fn bring_up(coordinator: &TransactionCoordinator, name: &str) {
        let mut access = coordinator.registry().acquire(name, AccessMode::Read).unwrap();
        access.set_connection_status(ConnectionStatus::Up).unwrap();
    }

    fn commit_scope() -> CommitScope {
        CommitScope {
            operation: WriteType::Commit,
            mode: ConfigMode::Global,
            vtn_name: None,
        }
    }

    #[test]
    fn test_audit_unblocks_commits() {
        let (coordinator, _) = coordinator();
        bring_up(&coordinator, "c1");

        let before = coordinator.commit(1, vec!["c1".into()], &commit_scope());
        assert_eq!(before.skipped(), vec!["c1"]);

        let audit = coordinator.run_audit("c1", AuditType::Driver).unwrap();
        assert!(audit.is_success());
        assert!(coordinator.registry().status("c1").unwrap().audit_result);
        assert!(coordinator.physical_snapshot("c1").is_none());

        let after = coordinator.commit(2, vec!["c1".into()], &commit_scope());
        assert!(after.is_success());
        assert_eq!(after.commit_results.len(), 1);
    }

    #[test]
    fn test_audit_start_resets_audit_result() {
        let (coordinator, _) = coordinator();
        bring_up(&coordinator, "c1");
        coordinator.run_audit("c1", AuditType::User).unwrap();

        coordinator.handle_audit_start("c1", AuditType::User).unwrap();
        assert!(!coordinator.registry().status("c1").unwrap().audit_result);
        assert!(coordinator.physical_snapshot("c1").is_some());

        coordinator.handle_audit_cancel("c1").unwrap();
        assert!(!coordinator.registry().status("c1").unwrap().audit_result);
    }

    #[test]
    fn test_audit_of_down_controller_fails() {
        let (coordinator, _) = coordinator();
        let result = coordinator.run_audit("c1", AuditType::Driver);
        assert_eq!(result, Err(TransactionError::CtrDisconnected("c1".into())));
        assert!(!coordinator.registry().status("c1").unwrap().audit_result);
    }

    #[test]
    fn test_failed_audit_keeps_controller_unaudited() {
        let (coordinator, pfc) = coordinator();
        bring_up(&coordinator, "c1");
        coordinator.handle_audit_start("c1", AuditType::Driver).unwrap();

        pfc.set_reachable("c1", false);
        let outcome = coordinator.handle_audit_transaction("c1");
        assert!(!outcome.is_success());
        assert_eq!(outcome.aborted, vec!["c1".to_string()]);
        coordinator.handle_audit_end("c1", false).unwrap();

        assert!(!coordinator.registry().status("c1").unwrap().audit_result);
        assert!(coordinator.physical_snapshot("c1").is_some());
    }
}
