//! Observability subsystem
//!
//! - Structured logging (JSON, one line per event)
//! - A closed set of named events
//! - Monotonic counters
//!
//! Observability is read-only: nothing here changes coordinator behavior.
//!
//! # Usage
//!
//! ```ignore
//! use vtn_coordinator::observability::{log_event_with_fields, Event};
//!
//! log_event_with_fields(Event::SessionAcquired, &[("session_id", "10")]);
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};

/// Log an event at its own severity
pub fn log_event(event: Event) {
    Logger::log(event.severity(), event.as_str(), &[]);
}

/// Log an event with fields at its own severity
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}
