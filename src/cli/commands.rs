//! CLI command implementations
//!
//! `serve` boots in a fixed order:
//! 1. Configuration load and validation
//! 2. Durable store open
//! 3. Driver and controller registration
//! 4. Entry into the configured cluster role
//! 5. Connectivity poller start
//!
//! and then reads requests from stdin until EOF, which shuts the
//! coordinator down (STOP wakes every waiter).

use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use serde_json::json;
use uuid::Uuid;

use crate::config::CoordinatorConfig;
use crate::context::{ContextSettings, CoordinatorContext};
use crate::dispatch::ServiceDispatcher;
use crate::observability::{log_event_with_fields, Event, Logger};
use crate::persistence::FileStore;
use crate::registry::{ConnectivityPoller, DriverType, PollReport};
use crate::rpc::RpcResponse;
use crate::status::StatusCode;
use crate::transaction::LoopbackDriver;

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::{read_requests, write_error, write_json, RequestLine};

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Serve { config } => serve(&config),
        Command::CheckConfig { config } => check_config(&config),
    }
}

/// Validate the configuration and print its effective form
pub fn check_config(config_path: &Path) -> CliResult<()> {
    let config = CoordinatorConfig::load(config_path)?;
    write_json(&mut io::stdout(), &config)
}

/// Boot the coordinator and serve stdin until EOF
pub fn serve(config_path: &Path) -> CliResult<()> {
    let config = CoordinatorConfig::load(config_path)?;
    let context = boot(&config)?;
    let dispatcher = ServiceDispatcher::new(context.clone());

    let stop = Arc::new(AtomicBool::new(false));
    let poller = Arc::new(ConnectivityPoller::new(
        context.registry().clone(),
        context.drivers().clone(),
    ));
    let audit_dispatcher = dispatcher.clone();
    let poller_handle = poller.spawn(config.poll_interval(), stop.clone(), move |report| {
        run_reconnect_audits(&audit_dispatcher, &report)
    });

    log_event_with_fields(Event::Serving, &[]);
    let stdin = io::stdin();
    let served = serve_requests(&dispatcher, stdin.lock(), &mut io::stdout(), || {
        context
            .shutdown()
            .map_err(|e| CliError::boot_failed(format!("shutdown failed: {}", e)))
    });

    stop.store(true, Ordering::SeqCst);
    if poller_handle.join().is_err() {
        return Err(CliError::boot_failed("connectivity poller panicked"));
    }

    served.map(|_| ())
}

/// Build a running coordinator from a validated configuration.
///
/// Every configured driver type gets an in-process loopback driver.
pub fn boot(config: &CoordinatorConfig) -> CliResult<Arc<CoordinatorContext>> {
    Logger::set_min_severity(config.severity()?);
    log_event_with_fields(Event::BootStart, &[("data_dir", &config.data_dir)]);

    let store = FileStore::open(config.data_path())
        .map_err(|e| CliError::boot_failed(e.to_string()))?;
    log_event_with_fields(
        Event::ConfigLoaded,
        &[
            ("data_dir", &config.data_dir),
            ("controllers", &config.controllers.len().to_string()),
        ],
    );

    let settings = ContextSettings {
        initial_state: config.unc_state()?,
        max_persist_failures: config.max_persist_failures,
        max_failover_attempts: config.max_failover_attempts,
    };
    let context = Arc::new(CoordinatorContext::new(Arc::new(store), settings));

    let driver_types: BTreeMap<DriverType, bool> = config
        .controllers
        .iter()
        .map(|c| (c.driver_type, c.two_phase))
        .collect();
    for (driver_type, two_phase) in driver_types {
        context
            .drivers()
            .register_loopback(Arc::new(LoopbackDriver::new(driver_type, two_phase)))
            .map_err(|e| CliError::boot_failed(e.to_string()))?;
    }
    for controller in &config.controllers {
        context
            .add_controller(&controller.name, controller.driver_type)
            .map_err(|e| CliError::boot_failed(e.to_string()))?;
    }

    let state = context
        .start()
        .and_then(|_| context.unc_state())
        .map_err(|e| CliError::boot_failed(e.to_string()))?;
    log_event_with_fields(Event::BootComplete, &[("unc_state", state.as_str())]);

    Ok(context)
}

/// Answer every request line from `reader` on `writer`.
///
/// Requests that may park in the acquisition queue run on their own thread
/// so the reader keeps going; everything else is answered in line order.
/// Malformed lines get an `INVALID_INPUT` response; a read failure is
/// reported and ends the loop.
///
/// `at_eof` runs once reading stops and before parked workers are joined,
/// so it has to wake them (`serve` moves to STOP). Returns the number of
/// requests accepted.
pub fn serve_requests<R, W, F>(
    dispatcher: &ServiceDispatcher,
    reader: R,
    writer: &mut W,
    at_eof: F,
) -> CliResult<usize>
where
    R: BufRead,
    W: Write + Send,
    F: FnOnce() -> CliResult<()>,
{
    let writer = Mutex::new(writer);

    thread::scope(|scope| {
        let mut workers = Vec::new();
        let mut answered = 0;
        let mut served = Ok(());

        for line in read_requests(reader) {
            let outcome = match line {
                Ok(RequestLine::Request(request)) if ServiceDispatcher::may_block(&request) => {
                    let writer = &writer;
                    workers.push(
                        scope.spawn(move || respond(writer, &dispatcher.dispatch(&request))),
                    );
                    Ok(())
                }
                Ok(RequestLine::Request(request)) => {
                    respond(&writer, &dispatcher.dispatch(&request))
                }
                Ok(RequestLine::Malformed(reason)) => {
                    let response =
                        RpcResponse::new(Uuid::new_v4().to_string(), StatusCode::InvalidInput)
                            .with_detail(json!({ "error": reason }));
                    respond(&writer, &response)
                }
                Err(e) => match lock_writer(&writer).and_then(|mut out| write_error(&mut **out, &e)) {
                    Ok(()) => Err(e),
                    Err(write_failed) => Err(write_failed),
                },
            };
            if let Err(e) = outcome {
                served = Err(e);
                break;
            }
            answered += 1;
        }

        let eof = at_eof();
        for worker in workers {
            let joined = match worker.join() {
                Ok(result) => result,
                Err(_) => Err(CliError::io_error("request worker panicked")),
            };
            if served.is_ok() {
                served = joined;
            }
        }

        served.and(eof).map(|_| answered)
    })
}

fn lock_writer<'a, 'w, W: Write>(
    writer: &'a Mutex<&'w mut W>,
) -> CliResult<MutexGuard<'a, &'w mut W>> {
    writer
        .lock()
        .map_err(|_| CliError::io_error("response writer poisoned"))
}

fn respond<W: Write>(writer: &Mutex<&mut W>, response: &RpcResponse) -> CliResult<()> {
    let mut out = lock_writer(writer)?;
    write_json(&mut **out, response)
}

/// Audit each controller that came back. Failures are already logged by
/// the audit pipeline and leave the controller unaudited.
fn run_reconnect_audits(dispatcher: &ServiceDispatcher, report: &PollReport) {
    for controller in &report.reconnected {
        if let Err(e) = dispatcher.run_driver_audit(controller) {
            log_event_with_fields(
                Event::AuditFailed,
                &[("controller", controller), ("reason", &e.to_string())],
            );
        }
    }
}
