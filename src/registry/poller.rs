//! Connectivity poller
//!
//! Pings every controller under a READ lease and records UP/DOWN
//! transitions. Either transition leaves the controller unaudited; the
//! caller decides what to do with reconnections (normally a driver audit).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::access::AccessMode;
use super::controller::ConnectionStatus;
use super::errors::{RegistryError, RegistryResult};
use super::table::ControllerRegistry;
use crate::observability::{log_event_with_fields, Event};
use crate::transaction::DriverTable;

/// Transitions observed by one poll cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub reconnected: Vec<String>,
    pub disconnected: Vec<String>,
}

impl PollReport {
    pub fn is_empty(&self) -> bool {
        self.reconnected.is_empty() && self.disconnected.is_empty()
    }
}

#[derive(Debug)]
pub struct ConnectivityPoller {
    registry: Arc<ControllerRegistry>,
    drivers: Arc<DriverTable>,
}

impl ConnectivityPoller {
    pub fn new(registry: Arc<ControllerRegistry>, drivers: Arc<DriverTable>) -> Self {
        Self { registry, drivers }
    }

    /// One pass over every controller in registration order
    pub fn poll_once(&self) -> RegistryResult<PollReport> {
        let mut report = PollReport::default();

        for name in self.registry.names()? {
            let mut access = match self.registry.acquire(&name, AccessMode::Read) {
                Ok(access) => access,
                // Deleted since the listing
                Err(RegistryError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };

            let reachable = self
                .drivers
                .get(access.info().driver_type)
                .map(|driver| driver.ping(&name))
                .unwrap_or(false);
            let status = if reachable {
                ConnectionStatus::Up
            } else {
                ConnectionStatus::Down
            };

            if access.set_connection_status(status)? {
                match status {
                    ConnectionStatus::Up => {
                        log_event_with_fields(Event::ControllerReconnected, &[("controller", &name)]);
                        report.reconnected.push(name.clone());
                    }
                    ConnectionStatus::Down => {
                        log_event_with_fields(Event::ControllerDisconnected, &[("controller", &name)]);
                        report.disconnected.push(name.clone());
                    }
                }
            }
        }

        Ok(report)
    }

    /// Poll every `interval` on a background thread until `stop` is set.
    ///
    /// `on_report` runs after each cycle that saw a transition.
    pub fn spawn<F>(
        self: Arc<Self>,
        interval: Duration,
        stop: Arc<AtomicBool>,
        on_report: F,
    ) -> JoinHandle<()>
    where
        F: Fn(PollReport) + Send + 'static,
    {
        thread::spawn(move || {
            // Sleep in short slices so shutdown is prompt
            let slice = interval.min(Duration::from_millis(50));
            while !stop.load(Ordering::SeqCst) {
                match self.poll_once() {
                    Ok(report) if !report.is_empty() => on_report(report),
                    Ok(_) => {}
                    Err(e) => {
                        log_event_with_fields(
                            Event::ControllerDisconnected,
                            &[("reason", &e.to_string())],
                        );
                    }
                }

                let mut waited = Duration::ZERO;
                while waited < interval && !stop.load(Ordering::SeqCst) {
                    thread::sleep(slice);
                    waited += slice;
                }
            }
        })
    }
}
