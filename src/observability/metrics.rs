//! Coordinator metrics
//!
//! Counters only, monotonic, reset on process start. All increments use
//! Relaxed ordering; readers only need eventually consistent values.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Metrics registry containing all operational counters
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    sessions_acquired: AtomicU64,
    sessions_released: AtomicU64,
    sessions_evicted: AtomicU64,
    busy_rejections: AtomicU64,
    queue_timeouts: AtomicU64,
    commits_succeeded: AtomicU64,
    commits_failed: AtomicU64,
    aborts_sent: AtomicU64,
    audits_succeeded: AtomicU64,
    audits_failed: AtomicU64,
    persistence_failures: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    // Session metrics

    pub fn increment_sessions_acquired(&self) {
        self.sessions_acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_sessions_released(&self) {
        self.sessions_released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_sessions_evicted(&self) {
        self.sessions_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_busy_rejections(&self) {
        self.busy_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_queue_timeouts(&self) {
        self.queue_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    // Transaction metrics

    pub fn increment_commits_succeeded(&self) {
        self.commits_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_commits_failed(&self) {
        self.commits_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Add the number of Abort calls sent for one failed batch
    pub fn add_aborts_sent(&self, count: u64) {
        self.aborts_sent.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_audits_succeeded(&self) {
        self.audits_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_audits_failed(&self) {
        self.audits_failed.fetch_add(1, Ordering::Relaxed);
    }

    // Recovery metrics

    pub fn increment_persistence_failures(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_acquired: self.sessions_acquired.load(Ordering::Relaxed),
            sessions_released: self.sessions_released.load(Ordering::Relaxed),
            sessions_evicted: self.sessions_evicted.load(Ordering::Relaxed),
            busy_rejections: self.busy_rejections.load(Ordering::Relaxed),
            queue_timeouts: self.queue_timeouts.load(Ordering::Relaxed),
            commits_succeeded: self.commits_succeeded.load(Ordering::Relaxed),
            commits_failed: self.commits_failed.load(Ordering::Relaxed),
            aborts_sent: self.aborts_sent.load(Ordering::Relaxed),
            audits_succeeded: self.audits_succeeded.load(Ordering::Relaxed),
            audits_failed: self.audits_failed.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
        }
    }

    /// Current values as a JSON object
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self.snapshot()).unwrap_or(serde_json::Value::Null)
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub sessions_acquired: u64,
    pub sessions_released: u64,
    pub sessions_evicted: u64,
    pub busy_rejections: u64,
    pub queue_timeouts: u64,
    pub commits_succeeded: u64,
    pub commits_failed: u64,
    pub aborts_sent: u64,
    pub audits_succeeded: u64,
    pub audits_failed: u64,
    pub persistence_failures: u64,
}
