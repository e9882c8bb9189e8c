//! Transaction and Controller Registry Property Tests
//!
//! Tests for:
//! - Batch rollback: only controllers that entered a failed batch are aborted
//! - Audit gating: unaudited controllers never see ordinary commits
//! - Recovery record written on a failed global commit, cleared on success
//! - Command cache replay for non-2PC drivers
//! - Delete waits for outstanding readers

use std::collections::HashSet;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use vtn_coordinator::context::{ContextSettings, CoordinatorContext};
use vtn_coordinator::lock::{ConfigMode, WriteType};
use vtn_coordinator::persistence::MemoryStore;
use vtn_coordinator::registry::{AccessMode, ConnectionStatus, DriverType, RegistryError};
use vtn_coordinator::status::StatusCode;
use vtn_coordinator::transaction::{
    AuditType, CommandEntry, CommandOp, CommitScope, ConfigObject, DriverCapability, DriverError,
    DriverResult, LoopbackDriver, PhysicalSnapshot,
};

// =============================================================================
// Test Utilities
// =============================================================================

/// 2PC driver that records every call and fails on request
#[derive(Default)]
struct RecordingDriver {
    calls: Mutex<Vec<String>>,
    fail_vote: Mutex<HashSet<String>>,
    fail_commit: Mutex<HashSet<String>>,
}

impl RecordingDriver {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn fail_vote_on(&self, controller: &str) {
        self.fail_vote.lock().unwrap().insert(controller.to_string());
    }

    fn fail_commit_on(&self, controller: &str, fail: bool) {
        let mut set = self.fail_commit.lock().unwrap();
        if fail {
            set.insert(controller.to_string());
        } else {
            set.remove(controller);
        }
    }
}

impl DriverCapability for RecordingDriver {
    fn driver_type(&self) -> DriverType {
        DriverType::Pfc
    }

    fn is_two_phase_commit_needed(&self) -> bool {
        true
    }

    fn vote(&self, controller: &str, config_id: u32) -> DriverResult<()> {
        self.record(format!("vote {} {}", controller, config_id));
        if self.fail_vote.lock().unwrap().contains(controller) {
            return Err(DriverError::new("vote rejected"));
        }
        Ok(())
    }

    fn commit(&self, controller: &str, config_id: u32) -> DriverResult<()> {
        self.record(format!("commit {} {}", controller, config_id));
        if self.fail_commit.lock().unwrap().contains(controller) {
            return Err(DriverError::new("commit rejected"));
        }
        Ok(())
    }

    fn abort(&self, controller: &str, config_id: u32) -> DriverResult<()> {
        self.record(format!("abort {} {}", controller, config_id));
        Ok(())
    }

    fn ping(&self, _controller: &str) -> bool {
        true
    }

    fn fetch_physical_config(&self, controller: &str) -> DriverResult<PhysicalSnapshot> {
        Ok(PhysicalSnapshot {
            controller: controller.to_string(),
            fetched_at: Utc::now(),
            objects: Vec::new(),
        })
    }
}

fn context() -> Arc<CoordinatorContext> {
    let context = Arc::new(CoordinatorContext::new(
        Arc::new(MemoryStore::new()),
        ContextSettings::default(),
    ));
    context.start().unwrap();
    context
}

fn with_recording_driver(names: &[&str]) -> (Arc<CoordinatorContext>, Arc<RecordingDriver>) {
    let context = context();
    let driver = Arc::new(RecordingDriver::default());
    context.drivers().register(driver.clone()).unwrap();
    for name in names {
        context.add_controller(name, DriverType::Pfc).unwrap();
        set_up(&context, name, true);
    }
    (context, driver)
}

fn set_up(context: &CoordinatorContext, name: &str, audited: bool) {
    let mut access = context.registry().acquire(name, AccessMode::Write).unwrap();
    access.set_connection_status(ConnectionStatus::Up).unwrap();
    access.set_audit_result(audited).unwrap();
}

fn global_scope() -> CommitScope {
    CommitScope {
        operation: WriteType::Commit,
        mode: ConfigMode::Global,
        vtn_name: None,
    }
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|n| n.to_string()).collect()
}

fn vtn(name: &str) -> ConfigObject {
    ConfigObject::Vtn {
        vtn_name: name.into(),
        description: None,
    }
}

// =============================================================================
// Batch Rollback
// =============================================================================

/// Controller 2 fails its vote: 1 and 2 are aborted, 3 is never touched.
#[test]
fn test_vote_failure_aborts_entered_controllers_only() {
    let (context, driver) = with_recording_driver(&["c1", "c2", "c3"]);
    driver.fail_vote_on("c2");

    let outcome = context
        .transactions()
        .commit(5, names(&["c1", "c2", "c3"]), &global_scope());

    assert!(!outcome.is_success());
    assert_eq!(outcome.status, StatusCode::DriverFailure);
    assert_eq!(
        driver.calls(),
        vec!["vote c1 5", "vote c2 5", "abort c1 5", "abort c2 5"]
    );
    assert_eq!(outcome.aborted, vec!["c1", "c2"]);
    assert!(outcome.commit_results.is_empty());
    assert_eq!(context.metrics().snapshot().commits_failed, 1);
}

/// Votes and commits follow the caller's controller order.
#[test]
fn test_commit_follows_list_order() {
    let (context, driver) = with_recording_driver(&["c1", "c2", "c3"]);

    let outcome = context
        .transactions()
        .commit(9, names(&["c3", "c1", "c2"]), &global_scope());

    assert!(outcome.is_success());
    assert_eq!(
        driver.calls(),
        vec![
            "vote c3 9",
            "vote c1 9",
            "vote c2 9",
            "commit c3 9",
            "commit c1 9",
            "commit c2 9"
        ]
    );
}

/// A failed global commit leaves a recovery record; the next success clears it.
#[test]
fn test_global_commit_failure_writes_recovery_record() {
    let (context, driver) = with_recording_driver(&["c1", "c2"]);
    driver.fail_commit_on("c2", true);

    let scope = CommitScope {
        operation: WriteType::Commit,
        mode: ConfigMode::Vtn,
        vtn_name: Some("red".into()),
    };
    let outcome = context.transactions().commit(3, names(&["c1", "c2"]), &scope);
    assert!(!outcome.is_success());
    assert_eq!(outcome.aborted, vec!["c1", "c2"]);

    let record = context.journal().load_record().unwrap().unwrap();
    assert_eq!(record.failed_operation, WriteType::Commit);
    assert_eq!(record.config_mode, ConfigMode::Vtn);
    assert_eq!(record.vtn_name.as_deref(), Some("red"));

    driver.fail_commit_on("c2", false);
    let outcome = context.transactions().commit(4, names(&["c1", "c2"]), &scope);
    assert!(outcome.is_success());
    assert!(context.journal().load_record().unwrap().is_none());
}

// =============================================================================
// Audit Gating
// =============================================================================

/// An unaudited controller is skipped until one audit succeeds.
#[test]
fn test_unaudited_controller_gated_until_audit() {
    let (context, driver) = with_recording_driver(&["c1"]);
    set_up(&context, "c1", false);

    let outcome = context.transactions().commit(7, names(&["c1"]), &global_scope());
    assert_eq!(outcome.skipped(), vec!["c1"]);
    assert!(driver.calls().is_empty());

    let audit = context
        .transactions()
        .run_audit("c1", AuditType::User)
        .unwrap();
    assert!(audit.is_success());
    assert!(context.controller_status("c1").unwrap().audit_result);
    driver.clear();

    let outcome = context.transactions().commit(8, names(&["c1"]), &global_scope());
    assert!(outcome.is_success());
    assert_eq!(driver.calls(), vec!["vote c1 8", "commit c1 8"]);
}

/// A failed audit keeps the controller closed to commits.
#[test]
fn test_failed_audit_keeps_controller_gated() {
    let (context, driver) = with_recording_driver(&["c1"]);
    driver.fail_vote_on("c1");

    let audit = context
        .transactions()
        .run_audit("c1", AuditType::Driver)
        .unwrap();
    assert!(!audit.is_success());
    assert!(!context.controller_status("c1").unwrap().audit_result);
    assert_eq!(context.metrics().snapshot().audits_failed, 1);
}

/// A reconnect clears the audit flag.
#[test]
fn test_reconnect_resets_audit_result() {
    let (context, _) = with_recording_driver(&["c1"]);
    {
        let mut access = context.registry().acquire("c1", AccessMode::Write).unwrap();
        access.set_connection_status(ConnectionStatus::Down).unwrap();
        access.set_connection_status(ConnectionStatus::Up).unwrap();
    }
    assert!(!context.controller_status("c1").unwrap().audit_result);
}

// =============================================================================
// Command Cache Replay
// =============================================================================

/// Non-2PC controllers apply cached commands in order during the vote.
#[test]
fn test_cache_replay_applies_in_order() {
    let context = context();
    let vnp = Arc::new(LoopbackDriver::new(DriverType::Vnp, false));
    context.drivers().register_loopback(vnp.clone()).unwrap();
    context.add_controller("vnp1", DriverType::Vnp).unwrap();
    set_up(&context, "vnp1", true);

    context
        .enqueue_command("vnp1", CommandEntry::new(CommandOp::Create, vtn("red")))
        .unwrap();
    context
        .enqueue_command("vnp1", CommandEntry::new(CommandOp::Create, vtn("blue")))
        .unwrap();
    context
        .enqueue_command("vnp1", CommandEntry::new(CommandOp::Delete, vtn("red")))
        .unwrap();

    let outcome = context.transactions().commit(2, names(&["vnp1"]), &global_scope());
    assert!(outcome.is_success());
    assert_eq!(vnp.applied("vnp1"), vec![vtn("blue")]);
    assert_eq!(context.command_cache().len("vnp1").unwrap(), 0);
}

/// The first failing command stops the replay and discards the rest.
#[test]
fn test_cache_replay_stops_at_failure() {
    let context = context();
    let vnp = Arc::new(LoopbackDriver::new(DriverType::Vnp, false));
    context.drivers().register_loopback(vnp.clone()).unwrap();
    context.add_controller("vnp1", DriverType::Vnp).unwrap();
    set_up(&context, "vnp1", true);

    for entry in [
        CommandEntry::new(CommandOp::Create, vtn("red")),
        CommandEntry::new(CommandOp::Delete, vtn("missing")),
        CommandEntry::new(CommandOp::Create, vtn("blue")),
    ] {
        context.enqueue_command("vnp1", entry).unwrap();
    }

    let outcome = context.transactions().commit(2, names(&["vnp1"]), &global_scope());
    assert_eq!(outcome.status, StatusCode::DriverFailure);
    assert_eq!(outcome.failed_object.unwrap().key, "missing");
    assert_eq!(vnp.applied("vnp1"), vec![vtn("red")]);
    assert_eq!(context.command_cache().len("vnp1").unwrap(), 0);
}

/// 2PC controllers have no command cache.
#[test]
fn test_enqueue_rejected_for_two_phase_driver() {
    let (context, _) = with_recording_driver(&["c1"]);
    let err = context
        .enqueue_command("c1", CommandEntry::new(CommandOp::Create, vtn("red")))
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::InvalidInput);
}

// =============================================================================
// Delete/Read Race
// =============================================================================

/// A delete waits for the last reader, and hides the controller meanwhile.
#[test]
fn test_delete_waits_for_readers() {
    let context = context();
    context.add_controller("c1", DriverType::Odc).unwrap();

    let reader = context.registry().acquire("c1", AccessMode::Read).unwrap();

    let (tx, rx) = mpsc::channel();
    let deleter = {
        let context = context.clone();
        thread::spawn(move || {
            let result = context.delete_controller("c1");
            tx.send(()).unwrap();
            result
        })
    };

    // Hidden from new access while the reader holds its slot
    let mut hidden = false;
    for _ in 0..200 {
        if matches!(
            context.registry().acquire("c1", AccessMode::Read),
            Err(RegistryError::NotFound(_))
        ) {
            hidden = true;
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    assert!(hidden);
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    assert!(context.registry().contains("c1").unwrap());

    drop(reader);
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    deleter.join().unwrap().unwrap();
    assert!(!context.registry().contains("c1").unwrap());
}
