//! End-to-End Dispatch Tests
//!
//! Boots the coordinator the way `serve` does (file-backed store, loopback
//! drivers, configured controllers) and drives it with JSON request lines.

use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;
use vtn_coordinator::cli::{boot, serve_requests};
use vtn_coordinator::config::{ControllerConfig, CoordinatorConfig};
use vtn_coordinator::context::CoordinatorContext;
use vtn_coordinator::dispatch::ServiceDispatcher;
use vtn_coordinator::lock::{ConfigMode, UncState, WriteType};
use vtn_coordinator::persistence::RecoveryRecord;
use vtn_coordinator::registry::{ConnectivityPoller, DriverType};
use vtn_coordinator::rpc::{RpcArg, RpcResponse};
use vtn_coordinator::status::StatusCode;

// =============================================================================
// Test Utilities
// =============================================================================

fn config(dir: &TempDir) -> CoordinatorConfig {
    let mut config = CoordinatorConfig::with_data_dir(dir.path().to_string_lossy());
    config.log_level = "error".into();
    config.controllers = vec![
        ControllerConfig {
            name: "pfc1".into(),
            driver_type: DriverType::Pfc,
            two_phase: true,
        },
        ControllerConfig {
            name: "vnp1".into(),
            driver_type: DriverType::Vnp,
            two_phase: false,
        },
    ];
    config
}

fn bring_up(context: &Arc<CoordinatorContext>) {
    let poller = ConnectivityPoller::new(context.registry().clone(), context.drivers().clone());
    poller.poll_once().unwrap();
}

fn u32_arg(value: u32) -> Value {
    json!({"type": "u32", "value": value})
}

fn u8_arg(value: u8) -> Value {
    json!({"type": "u8", "value": value})
}

fn str_arg(value: &str) -> Value {
    json!({"type": "str", "value": value})
}

fn request(service: &str, args: Vec<Value>) -> String {
    json!({"service": service, "args": args}).to_string()
}

fn request_with_id(id: &str, service: &str, args: Vec<Value>) -> String {
    json!({"id": id, "service": service, "args": args}).to_string()
}

fn i32_arg(value: i32) -> Value {
    json!({"type": "i32", "value": value})
}

fn exchange(dispatcher: &ServiceDispatcher, lines: &[String]) -> Vec<RpcResponse> {
    let input = lines.join("\n");
    let mut out = Vec::new();
    serve_requests(dispatcher, input.as_bytes(), &mut out, || Ok(())).unwrap();
    String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

// =============================================================================
// Full Session
// =============================================================================

/// Acquire, audit, cache a command, commit, and release over the wire.
#[test]
fn test_session_commit_over_the_wire() {
    let dir = TempDir::new().unwrap();
    let context = boot(&config(&dir)).unwrap();
    bring_up(&context);
    let dispatcher = ServiceDispatcher::new(context.clone());

    let responses = exchange(
        &dispatcher,
        &[
            request("CONFIG", vec![u32_arg(10), u8_arg(0)]),
            request("AUDIT", vec![u32_arg(10), str_arg("pfc1"), u8_arg(0)]),
            request("AUDIT", vec![u32_arg(10), str_arg("vnp1"), u8_arg(0)]),
            request(
                "CONTROLLER",
                vec![
                    u8_arg(5),
                    str_arg("vnp1"),
                    u8_arg(0),
                    str_arg(r#"{"kind": "vtn", "vtn_name": "red"}"#),
                ],
            ),
            request("CANDIDATE", vec![u32_arg(10), u32_arg(1)]),
            request("CONFIG", vec![u32_arg(10), u8_arg(1), u32_arg(1)]),
        ],
    );

    let statuses: Vec<StatusCode> = responses.iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![StatusCode::Success; 6]);
    assert_eq!(responses[0].outputs, vec![RpcArg::U32(1)]);
    assert_eq!(responses[3].outputs, vec![RpcArg::U32(1)]);

    let commit = responses[4].detail.as_ref().unwrap();
    assert_eq!(commit["config_id"], 1);
    assert_eq!(commit["vote_results"][0]["controller"], "pfc1");
    assert_eq!(commit["vote_results"][1]["controller"], "vnp1");
    assert_eq!(commit["commit_results"][0]["controller"], "pfc1");

    assert_eq!(context.config_lock().session_count().unwrap(), 0);
    assert!(!context.journal().is_global_dirty().unwrap());
    assert_eq!(context.metrics().snapshot().commits_succeeded, 1);
}

/// Contention and protocol errors map onto their status codes.
#[test]
fn test_error_statuses_over_the_wire() {
    let dir = TempDir::new().unwrap();
    let dispatcher = ServiceDispatcher::new(boot(&config(&dir)).unwrap());

    let responses = exchange(
        &dispatcher,
        &[
            request("CONFIG", vec![u32_arg(10), u8_arg(0)]),
            request("CONFIG", vec![u32_arg(10), u8_arg(0)]),
            request("CONFIG", vec![u32_arg(11), u8_arg(0)]),
            request("CONFIG", vec![u32_arg(12), u8_arg(4), u8_arg(3), str_arg("bad name!")]),
            request("CANDIDATE", vec![u32_arg(10), u32_arg(2)]),
            request("ABORT_CANDIDATE", vec![u32_arg(10), u32_arg(1)]),
            request("STARTUP_DB", vec![]),
            "{\"service\": \"NOPE\"}".to_string(),
        ],
    );

    let statuses: Vec<StatusCode> = responses.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            StatusCode::Success,
            StatusCode::AlreadyAcquired,
            StatusCode::Busy,
            StatusCode::InvalidInput,
            StatusCode::InvalidConfigId,
            StatusCode::Success,
            StatusCode::ServiceNotSupported,
            StatusCode::InvalidInput,
        ]
    );
    assert!(responses[1].detail.as_ref().unwrap()["error"].is_string());
}

/// A parked timed acquisition does not stop the reader: the release on the
/// next line is read and hands the GLOBAL scope to the waiter.
#[test]
fn test_release_reaches_parked_waiter() {
    let dir = TempDir::new().unwrap();
    let context = boot(&config(&dir)).unwrap();
    let dispatcher = ServiceDispatcher::new(context.clone());

    let responses = exchange(
        &dispatcher,
        &[
            request_with_id("acquire", "CONFIG", vec![u32_arg(10), u8_arg(0)]),
            request_with_id("wait", "CONFIG", vec![u32_arg(11), u8_arg(3), i32_arg(-1)]),
            request_with_id("release", "CONFIG", vec![u32_arg(10), u8_arg(1), u32_arg(1)]),
        ],
    );
    assert_eq!(responses.len(), 3);
    assert_eq!(responses[0].request_id, "acquire");

    let by_id = |id: &str| responses.iter().find(|r| r.request_id == id).unwrap();
    assert_eq!(by_id("release").status, StatusCode::Success);
    assert_eq!(by_id("wait").status, StatusCode::Success);
    assert_eq!(by_id("wait").outputs, vec![RpcArg::U32(2)]);
    assert_eq!(
        context.config_lock().get_config_data(11).unwrap().mode,
        ConfigMode::Global
    );
}

/// Force acquisition evicts the holder of the same key only.
#[test]
fn test_force_acquire_evicts_holder() {
    let dir = TempDir::new().unwrap();
    let context = boot(&config(&dir)).unwrap();
    let dispatcher = ServiceDispatcher::new(context.clone());

    let responses = exchange(
        &dispatcher,
        &[
            request("CONFIG", vec![u32_arg(10), u8_arg(0)]),
            request("CONFIG", vec![u32_arg(11), u8_arg(4), u8_arg(1)]),
            request("CONFIG", vec![u32_arg(12), u8_arg(2)]),
            request("CONFIG", vec![u32_arg(10), u8_arg(1), u32_arg(1)]),
        ],
    );
    let statuses: Vec<StatusCode> = responses.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            StatusCode::Success,
            StatusCode::Success,
            StatusCode::Success,
            StatusCode::NoConfigSessionExist,
        ]
    );
    assert_eq!(responses[2].outputs, vec![RpcArg::U32(3)]);

    assert!(context.config_lock().session(10).unwrap().is_none());
    assert!(context.config_lock().session(11).unwrap().is_some());
    assert_eq!(
        context.config_lock().get_config_data(12).unwrap().mode,
        ConfigMode::Global
    );
    assert_eq!(context.metrics().snapshot().sessions_evicted, 1);
}

// =============================================================================
// Restart and Failover
// =============================================================================

/// The recovery record survives a restart and escalates after too many failovers.
#[test]
fn test_recovery_record_escalates_across_restarts() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir);
    config.max_failover_attempts = 1;

    {
        let context = boot(&config).unwrap();
        let record = RecoveryRecord::new(WriteType::Commit, ConfigMode::Global, None);
        context.journal().write_record(&record).unwrap();
    }

    let context = boot(&config).unwrap();
    assert_eq!(context.unc_state().unwrap(), UncState::Act);
    assert_eq!(
        context.journal().load_record().unwrap().unwrap().failover_attempts,
        1
    );
    drop(context);

    let context = boot(&config).unwrap();
    assert_eq!(context.unc_state().unwrap(), UncState::ActFail);
    assert_eq!(
        context.journal().load_record().unwrap().unwrap().failover_attempts,
        2
    );
}

/// The global-dirty flag is durable while a GLOBAL session is open.
#[test]
fn test_global_dirty_flag_persists() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);

    {
        let context = boot(&config).unwrap();
        let dispatcher = ServiceDispatcher::new(context.clone());
        let responses = exchange(&dispatcher, &[request("CONFIG", vec![u32_arg(10), u8_arg(0)])]);
        assert_eq!(responses[0].status, StatusCode::Success);
        assert!(context.journal().is_global_dirty().unwrap());
    }

    let context = boot(&config).unwrap();
    assert!(context.journal().is_global_dirty().unwrap());
    assert_eq!(context.config_lock().session_count().unwrap(), 0);
}
