//! Transaction coordinator
//!
//! Drives vote -> global commit (or global abort) across the controllers of
//! one configuration change.
//!
//! Per controller, in list order:
//! - unknown, DOWN, or (for non-audit commits) unaudited controllers are
//!   reported `CTR_DISCONNECTED` and skipped; they never enter the batch
//! - 2PC drivers vote; other drivers replay the controller's command cache
//! - the write access guard is held only for that controller's phase
//!
//! Any failure aborts every controller that entered the batch, including
//! the one that failed. Skipped controllers receive nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;

use super::cache::CommandCache;
use super::driver::{DriverTable, PhysicalSnapshot};
use super::errors::{TransactionError, TransactionResult};
use crate::lock::{ConfigMode, WriteType};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};
use crate::persistence::{RecoveryJournal, RecoveryRecord};
use crate::registry::{AccessMode, ConnectionStatus, ControllerRegistry, DriverType, RegistryError};
use crate::status::StatusCode;

/// Per-controller outcome of one phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionPhaseResult {
    pub controller: String,
    pub response_code: StatusCode,
    pub error_count: u32,
}

/// Cache entry that stopped a command replay
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedObject {
    pub controller: String,
    pub key: String,
    pub value: Value,
    pub reason: String,
}

#[derive(Debug, Clone)]
struct EnteredController {
    name: String,
    driver_type: DriverType,
    two_phase: bool,
}

/// State of one vote/commit/abort round
#[derive(Debug)]
pub struct CommitBatch {
    config_id: u32,
    controllers: Vec<String>,
    entered: Vec<EnteredController>,
    vote_results: Vec<TransactionPhaseResult>,
    commit_results: Vec<TransactionPhaseResult>,
    aborted: Vec<String>,
    failed_object: Option<FailedObject>,
    failure: Option<StatusCode>,
}

impl CommitBatch {
    /// `config_id` 0 marks an audit-originated transaction
    pub fn new(config_id: u32, controllers: Vec<String>) -> Self {
        Self {
            config_id,
            controllers,
            entered: Vec::new(),
            vote_results: Vec::new(),
            commit_results: Vec::new(),
            aborted: Vec::new(),
            failed_object: None,
            failure: None,
        }
    }

    pub fn is_audit(&self) -> bool {
        self.config_id == 0
    }

    /// Controllers that entered the transaction, in vote order
    pub fn entered(&self) -> Vec<String> {
        self.entered.iter().map(|e| e.name.clone()).collect()
    }

    fn record_vote(&mut self, controller: &str, response_code: StatusCode) {
        self.vote_results.push(TransactionPhaseResult {
            controller: controller.to_string(),
            response_code,
            error_count: u32::from(!response_code.is_success()),
        });
    }

    fn record_commit(&mut self, controller: &str, response_code: StatusCode) {
        self.commit_results.push(TransactionPhaseResult {
            controller: controller.to_string(),
            response_code,
            error_count: u32::from(!response_code.is_success()),
        });
    }

    fn fail(&mut self, status: StatusCode) {
        if self.failure.is_none() {
            self.failure = Some(status);
        }
    }

    pub fn into_outcome(self) -> CommitOutcome {
        CommitOutcome {
            config_id: self.config_id,
            status: self.failure.unwrap_or(StatusCode::Success),
            vote_results: self.vote_results,
            commit_results: self.commit_results,
            aborted: self.aborted,
            failed_object: self.failed_object,
        }
    }
}

/// Aggregated result forwarded to the requesting client
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitOutcome {
    pub config_id: u32,
    pub status: StatusCode,
    pub vote_results: Vec<TransactionPhaseResult>,
    pub commit_results: Vec<TransactionPhaseResult>,
    pub aborted: Vec<String>,
    pub failed_object: Option<FailedObject>,
}

impl CommitOutcome {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Controllers reported disconnected or unaudited
    pub fn skipped(&self) -> Vec<&str> {
        self.vote_results
            .iter()
            .filter(|r| r.response_code == StatusCode::CtrDisconnected)
            .map(|r| r.controller.as_str())
            .collect()
    }
}

/// Scope of the change being committed, kept for the recovery record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitScope {
    pub operation: WriteType,
    pub mode: ConfigMode,
    pub vtn_name: Option<String>,
}

pub struct TransactionCoordinator {
    pub(super) registry: Arc<ControllerRegistry>,
    pub(super) drivers: Arc<DriverTable>,
    pub(super) cache: Arc<CommandCache>,
    pub(super) journal: Arc<RecoveryJournal>,
    pub(super) metrics: Arc<MetricsRegistry>,
    pub(super) snapshots: Mutex<HashMap<String, PhysicalSnapshot>>,
}

impl TransactionCoordinator {
    pub fn new(
        registry: Arc<ControllerRegistry>,
        drivers: Arc<DriverTable>,
        cache: Arc<CommandCache>,
        journal: Arc<RecoveryJournal>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            registry,
            drivers,
            cache,
            journal,
            metrics,
            snapshots: Mutex::new(HashMap::new()),
        }
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

    // =========================================================================
    // COMMIT
    // =========================================================================

    /// Full commit: vote, then global commit, with global abort on failure.
    pub fn commit(&self, config_id: u32, controllers: Vec<String>, scope: &CommitScope) -> CommitOutcome {
        let mut batch = CommitBatch::new(config_id, controllers);

        if !self.handle_commit_vote_request(&mut batch) {
            self.handle_global_abort(&mut batch);
            self.metrics.increment_commits_failed();
            return batch.into_outcome();
        }

        if !self.handle_commit_global_commit(&mut batch) {
            self.handle_global_abort(&mut batch);
            self.metrics.increment_commits_failed();
            let record = RecoveryRecord::new(scope.operation, scope.mode, scope.vtn_name.clone());
            // Failure is counted and escalated by the journal
            let _ = self.journal.write_record(&record);
            return batch.into_outcome();
        }

        if let Ok(Some(_)) = self.journal.load_record() {
            let _ = self.journal.clear_record();
        }
        self.metrics.increment_commits_succeeded();
        let config_id_str = config_id.to_string();
        let entered = batch.entered().join(",");
        log_event_with_fields(
            Event::CommitComplete,
            &[("config_id", &config_id_str), ("controllers", &entered)],
        );
        batch.into_outcome()
    }

    /// Vote phase over every controller in list order.
    ///
    /// Returns false on the first failure; the caller must then run
    /// `handle_global_abort`.
    pub fn handle_commit_vote_request(&self, batch: &mut CommitBatch) -> bool {
        let config_id_str = batch.config_id.to_string();
        log_event_with_fields(
            Event::CommitVoteBegin,
            &[
                ("config_id", &config_id_str),
                ("controller_count", &batch.controllers.len().to_string()),
            ],
        );

        for name in batch.controllers.clone() {
            let access = match self.registry.acquire(&name, AccessMode::Write) {
                Ok(access) => access,
                Err(RegistryError::NotFound(_)) => {
                    batch.record_vote(&name, StatusCode::CtrDisconnected);
                    continue;
                }
                Err(e) => {
                    batch.record_vote(&name, e.status());
                    batch.fail(e.status());
                    return false;
                }
            };

            let info = access.info().clone();
            let unaudited = !batch.is_audit() && !info.audit_result;
            if info.connection_status != ConnectionStatus::Up || unaudited {
                batch.record_vote(&name, StatusCode::CtrDisconnected);
                continue;
            }

            let driver = match self.drivers.get(info.driver_type) {
                Ok(driver) => driver,
                Err(e) => {
                    batch.record_vote(&name, StatusCode::CtrDisconnected);
                    log_event_with_fields(
                        Event::CommitVoteFailed,
                        &[("controller", &name), ("reason", &e.to_string())],
                    );
                    continue;
                }
            };

            let two_phase = driver.is_two_phase_commit_needed();
            batch.entered.push(EnteredController {
                name: name.clone(),
                driver_type: info.driver_type,
                two_phase,
            });

            let result = if two_phase {
                driver
                    .vote(&name, batch.config_id)
                    .map_err(|e| TransactionError::driver(&name, e))
            } else {
                self.replay_cache(&name, info.driver_type, batch)
            };
            drop(access);

            if let Err(e) = result {
                batch.record_vote(&name, e.status());
                batch.fail(e.status());
                log_event_with_fields(
                    Event::CommitVoteFailed,
                    &[
                        ("config_id", &config_id_str),
                        ("controller", &name),
                        ("reason", &e.to_string()),
                    ],
                );
                return false;
            }
            batch.record_vote(&name, StatusCode::Success);
        }

        true
    }

    /// Apply the controller's cached commands in order, stopping at the
    /// first failure. Commands after a failure are discarded with it.
    fn replay_cache(
        &self,
        controller: &str,
        driver_type: DriverType,
        batch: &mut CommitBatch,
    ) -> TransactionResult<()> {
        for entry in self.cache.take(controller)? {
            let handler = self
                .drivers
                .handler(driver_type, entry.object.kind())?
                .ok_or_else(|| {
                    TransactionError::driver(
                        controller,
                        super::errors::DriverError::new(format!(
                            "no handler for {}",
                            entry.object.kind()
                        )),
                    )
                });

            let result = handler.and_then(|h| {
                h.apply(controller, entry.op, &entry.object)
                    .map_err(|e| TransactionError::driver(controller, e))
            });

            if let Err(e) = result {
                batch.failed_object = Some(FailedObject {
                    controller: controller.to_string(),
                    key: entry.object.key(),
                    value: entry.object.value_json(),
                    reason: e.to_string(),
                });
                return Err(e);
            }
        }
        Ok(())
    }

    /// Global commit for every 2PC controller that voted.
    pub fn handle_commit_global_commit(&self, batch: &mut CommitBatch) -> bool {
        for entered in batch.entered.clone() {
            if !entered.two_phase {
                continue;
            }

            let result = self
                .registry
                .acquire(&entered.name, AccessMode::Write)
                .map_err(TransactionError::from)
                .and_then(|access| {
                    let driver = self.drivers.get(entered.driver_type)?;
                    let result = driver
                        .commit(&entered.name, batch.config_id)
                        .map_err(|e| TransactionError::driver(&entered.name, e));
                    drop(access);
                    result
                });

            match result {
                Ok(()) => batch.record_commit(&entered.name, StatusCode::Success),
                Err(e) => {
                    batch.record_commit(&entered.name, e.status());
                    batch.fail(e.status());
                    log_event_with_fields(
                        Event::CommitGlobalFailed,
                        &[
                            ("config_id", &batch.config_id.to_string()),
                            ("controller", &entered.name),
                            ("reason", &e.to_string()),
                        ],
                    );
                    return false;
                }
            }
        }
        true
    }

    /// Abort every controller that entered the batch. Abort failures are
    /// logged; there is nothing further to roll back.
    pub fn handle_global_abort(&self, batch: &mut CommitBatch) {
        for entered in batch.entered.clone() {
            let access = match self.registry.acquire(&entered.name, AccessMode::Write) {
                Ok(access) => access,
                Err(_) => continue,
            };
            let result = self
                .drivers
                .get(entered.driver_type)
                .and_then(|d| {
                    d.abort(&entered.name, batch.config_id)
                        .map_err(|e| TransactionError::driver(&entered.name, e))
                });
            drop(access);

            if let Err(e) = result {
                log_event_with_fields(
                    Event::CommitAborted,
                    &[("controller", &entered.name), ("reason", &e.to_string())],
                );
            }
            batch.aborted.push(entered.name.clone());
        }

        self.metrics.add_aborts_sent(batch.aborted.len() as u64);
        log_event_with_fields(
            Event::CommitAborted,
            &[
                ("config_id", &batch.config_id.to_string()),
                ("aborted", &batch.aborted.join(",")),
            ],
        );
    }
}

impl std::fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("drivers", &self.drivers)
            .finish()
    }
}
