//! Config session coordinator
//!
//! Turns one CONFIG or ABORT_CANDIDATE request into ConfigLock calls plus
//! participant notification, driven through the phase pipeline.

use std::sync::{Arc, RwLock};

use super::errors::{ParticipantError, SessionError, SessionResult};
use super::participant::{NoticeKind, Participant, SessionNotice};
use super::pipeline::{run_phases, Operation, Phase};
use super::request::{CandidateRequest, ConfigRequest};
use super::wait_queue::AcquisitionQueue;
use crate::lock::{
    ConfigData, ConfigLock, ConfigMode, LockError, LockGrant, LockOperation, ModeKey,
    NotifyKind, UncState, WriteType,
};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};
use crate::persistence::RecoveryJournal;
use crate::rpc::RpcArg;

pub struct ConfigSessionCoordinator {
    lock: Arc<ConfigLock>,
    queue: AcquisitionQueue,
    participants: RwLock<Vec<Arc<dyn Participant>>>,
    journal: Arc<RecoveryJournal>,
    metrics: Arc<MetricsRegistry>,
}

impl ConfigSessionCoordinator {
    pub fn new(
        lock: Arc<ConfigLock>,
        journal: Arc<RecoveryJournal>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            lock,
            queue: AcquisitionQueue::new(metrics.clone()),
            participants: RwLock::new(Vec::new()),
            journal,
            metrics,
        }
    }

    pub fn config_lock(&self) -> &Arc<ConfigLock> {
        &self.lock
    }

    pub fn queue(&self) -> &AcquisitionQueue {
        &self.queue
    }

    pub fn register_participant(&self, participant: Arc<dyn Participant>) -> SessionResult<()> {
        self.participants
            .write()
            .map_err(|_| SessionError::poisoned("participants"))?
            .push(participant);
        Ok(())
    }

    fn participants(&self) -> SessionResult<Vec<Arc<dyn Participant>>> {
        Ok(self
            .participants
            .read()
            .map_err(|_| SessionError::poisoned("participants"))?
            .clone())
    }

    // =========================================================================
    // SERVICES
    // =========================================================================

    /// CONFIG service. Returns the config id for acquisitions.
    pub fn handle_config(&self, args: &[RpcArg]) -> SessionResult<Option<u32>> {
        let op = ConfigOp {
            coordinator: self,
            args,
            request: None,
            grant: None,
            released: None,
            notices: Vec::new(),
            announced: false,
        };
        run_phases(op).map_err(|failure| self.report("CONFIG", failure.phase, failure.error))
    }

    /// ABORT_CANDIDATE service: every participant discards its candidate.
    pub fn abort_candidate(&self, args: &[RpcArg]) -> SessionResult<()> {
        let op = AbortCandidateOp {
            coordinator: self,
            args,
            request: None,
            notice: None,
            holds_write: false,
        };
        run_phases(op).map_err(|failure| {
            self.report("ABORT_CANDIDATE", failure.phase, failure.error)
        })
    }

    /// Wake every queued acquisition. Used when leaving ACT.
    pub fn clear_config_acquisition_queue(&self) -> SessionResult<usize> {
        self.queue.clear()
    }

    fn report(&self, service: &str, phase: Phase, error: SessionError) -> SessionError {
        if error.is_contention() {
            self.metrics.increment_busy_rejections();
            let phase_str = phase.to_string();
            let reason = error.to_string();
            log_event_with_fields(
                Event::AcquisitionBusy,
                &[("phase", &phase_str), ("reason", &reason), ("service", service)],
            );
        }
        error
    }

    // =========================================================================
    // PARTICIPANTS
    // =========================================================================

    /// Deliver to every participant, stopping at the first refusal
    fn announce(&self, notice: &SessionNotice) -> SessionResult<()> {
        for participant in self.participants()? {
            participant.notify(notice).map_err(|e| {
                log_notify_failure(&e, notice);
                SessionError::Participant(e)
            })?;
        }
        Ok(())
    }

    /// Deliver to every participant, logging refusals
    fn announce_best_effort(&self, notice: &SessionNotice) {
        let Ok(participants) = self.participants() else {
            return;
        };
        for participant in participants {
            if let Err(e) = participant.notify(notice) {
                log_notify_failure(&e, notice);
            }
        }
    }

    fn all_participants_clean(&self) -> bool {
        let Ok(participants) = self.participants() else {
            return false;
        };
        participants
            .iter()
            .all(|p| matches!(p.is_candidate_dirty(), Ok(false)))
    }

    fn current_state(&self) -> SessionResult<UncState> {
        Ok(self.lock.get_unc_current_state()?)
    }

    /// Queued acquisitions are all GLOBAL; only a free GLOBAL scope can
    /// satisfy the head.
    fn wake_queue_if_global_free(&self) -> SessionResult<()> {
        if self.lock.holder_of(&ModeKey::Global)?.is_none() {
            self.queue.handle_config_release()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ConfigSessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigSessionCoordinator")
            .field("queued", &self.queue.len().ok())
            .finish()
    }
}

fn log_notify_failure(error: &ParticipantError, notice: &SessionNotice) {
    let session = notice.session_id.to_string();
    let kind = format!("{:?}", notice.kind);
    log_event_with_fields(
        Event::ParticipantNotifyFailed,
        &[
            ("notice", &kind),
            ("participant", &error.participant),
            ("reason", &error.reason),
            ("session_id", &session),
        ],
    );
}

// =============================================================================
// CONFIG
// =============================================================================

struct ConfigOp<'a> {
    coordinator: &'a ConfigSessionCoordinator,
    args: &'a [RpcArg],
    request: Option<ConfigRequest>,
    grant: Option<LockGrant>,
    /// Scope of the session being released
    released: Option<ConfigData>,
    notices: Vec<SessionNotice>,
    /// Participants were told about the acquisition
    announced: bool,
}

impl ConfigOp<'_> {
    fn request(&self) -> SessionResult<&ConfigRequest> {
        self.request
            .as_ref()
            .ok_or_else(|| SessionError::Internal("request not validated".into()))
    }

    fn notice(&self, kind: NoticeKind, session_id: u32, config_id: u32) -> SessionResult<SessionNotice> {
        let (mode, vtn_name) = self.request()?.mode();
        Ok(SessionNotice {
            kind,
            session_id,
            config_id,
            mode,
            vtn_name: vtn_name.map(str::to_string),
        })
    }
}

impl Operation for ConfigOp<'_> {
    type Output = Option<u32>;

    fn validate(&mut self) -> SessionResult<()> {
        self.request = Some(ConfigRequest::parse(self.args)?);
        Ok(())
    }

    fn get_exclusion(&mut self) -> SessionResult<()> {
        let request = self.request()?.clone();
        let coordinator = self.coordinator;
        let lock = &coordinator.lock;
        let session_id = request.session_id();

        let grant = match request {
            ConfigRequest::Acquire { .. } => {
                lock.get_lock(session_id, LockOperation::AcquireConfigSession, None, None, None)?
            }
            ConfigRequest::AcquireForce { .. } => lock.get_lock(
                session_id,
                LockOperation::ForceAcquireConfigSession,
                None,
                None,
                None,
            )?,
            ConfigRequest::AcquirePartial {
                mode, ref vtn_name, ..
            } => lock.get_lock(
                session_id,
                LockOperation::AcquireConfigSession,
                None,
                Some(mode),
                vtn_name.as_deref(),
            )?,
            ConfigRequest::AcquireTimed { timeout_ms, .. } => coordinator.queue.acquire(
                session_id,
                timeout_ms,
                || {
                    Ok(lock.get_lock(
                        session_id,
                        LockOperation::AcquireConfigSession,
                        None,
                        None,
                        None,
                    )?)
                },
                || coordinator.current_state(),
            )?,
            ConfigRequest::Release { config_id, .. } => {
                lock.release_lock(session_id, config_id, LockOperation::AcquireConfigSession, None)?;
                self.released = Some(lock.get_config_data(session_id)?);
                return Ok(());
            }
        };

        self.grant = Some(grant);
        Ok(())
    }

    fn create_msg_list(&mut self) -> SessionResult<()> {
        let session_id = self.request()?.session_id();

        if let Some(released) = self.released.clone() {
            self.notices.push(SessionNotice {
                kind: NoticeKind::Released,
                session_id,
                config_id: released.config_id,
                mode: released.mode,
                vtn_name: released.vtn_name,
            });
            return Ok(());
        }

        let grant = self
            .grant
            .clone()
            .ok_or_else(|| SessionError::Internal("no exclusion held".into()))?;
        if let Some(evicted) = &grant.evicted {
            let notice = self.notice(NoticeKind::Evicted, evicted.session_id, evicted.config_id)?;
            self.notices.push(notice);
        }
        let notice = self.notice(NoticeKind::Acquired, session_id, grant.config_id)?;
        self.notices.push(notice);
        Ok(())
    }

    fn execute(&mut self) -> SessionResult<()> {
        let coordinator = self.coordinator;

        for notice in &self.notices {
            match notice.kind {
                NoticeKind::Acquired => {
                    coordinator.announce(notice)?;
                    self.announced = true;
                }
                NoticeKind::Evicted => {
                    coordinator.metrics.increment_sessions_evicted();
                    let evicted = notice.session_id.to_string();
                    let config_id = notice.config_id.to_string();
                    log_event_with_fields(
                        Event::SessionEvicted,
                        &[("config_id", &config_id), ("session_id", &evicted)],
                    );
                    coordinator.announce_best_effort(notice);
                }
                // A release cannot be refused
                NoticeKind::Released | NoticeKind::CandidateAborted => {
                    coordinator.announce_best_effort(notice)
                }
            }
        }

        if self.grant.is_some() && self.request()?.mode().0 == ConfigMode::Global {
            // Recovery hint only; the journal logs and escalates failures
            let _ = coordinator.journal.set_global_dirty(true);
        }
        Ok(())
    }

    fn release_exclusion(&mut self) -> SessionResult<()> {
        let coordinator = self.coordinator;
        let session_id = self.request()?.session_id();
        let session = session_id.to_string();

        if let Some(released) = &self.released {
            coordinator.lock.notify_config_id_session_id_done(
                released.config_id,
                session_id,
                NotifyKind::Release,
            )?;
            if released.mode == ConfigMode::Global && coordinator.all_participants_clean() {
                let _ = coordinator.journal.set_global_dirty(false);
            }
            coordinator.wake_queue_if_global_free()?;

            coordinator.metrics.increment_sessions_released();
            let config_id = released.config_id.to_string();
            log_event_with_fields(
                Event::SessionReleased,
                &[
                    ("config_id", &config_id),
                    ("mode", released.mode.as_str()),
                    ("session_id", &session),
                ],
            );
            return Ok(());
        }

        let grant = self
            .grant
            .as_ref()
            .ok_or_else(|| SessionError::Internal("no exclusion held".into()))?;
        coordinator.lock.notify_config_id_session_id_done(
            grant.config_id,
            session_id,
            NotifyKind::Acquire,
        )?;

        coordinator.metrics.increment_sessions_acquired();
        let request = self.request()?;
        let (mode, vtn_name) = request.mode();
        let config_id = grant.config_id.to_string();
        log_event_with_fields(
            Event::SessionAcquired,
            &[
                ("config_id", &config_id),
                ("mode", mode.as_str()),
                ("operation", request.name()),
                ("session_id", &session),
                ("vtn_name", vtn_name.unwrap_or("")),
            ],
        );
        Ok(())
    }

    fn revoke(&mut self, _failed: Phase) {
        let Some(grant) = self.grant.take() else {
            // Release-side failures leave the session in its release handshake
            return;
        };
        let Ok(session_id) = self.request().map(|r| r.session_id()) else {
            return;
        };
        let coordinator = self.coordinator;
        let lock = &coordinator.lock;

        let _ = lock.notify_config_id_session_id_done(grant.config_id, session_id, NotifyKind::Acquire);
        let _ = lock.release_lock(
            session_id,
            grant.config_id,
            LockOperation::AcquireConfigSession,
            None,
        );
        let _ = lock.notify_config_id_session_id_done(grant.config_id, session_id, NotifyKind::Release);

        if self.announced {
            if let Ok(notice) = self.notice(NoticeKind::Released, session_id, grant.config_id) {
                coordinator.announce_best_effort(&notice);
            }
        }
        let _ = coordinator.wake_queue_if_global_free();
    }

    fn into_output(self) -> Option<u32> {
        self.grant.map(|g| g.config_id)
    }
}

// =============================================================================
// ABORT_CANDIDATE
// =============================================================================

struct AbortCandidateOp<'a> {
    coordinator: &'a ConfigSessionCoordinator,
    args: &'a [RpcArg],
    request: Option<CandidateRequest>,
    notice: Option<SessionNotice>,
    holds_write: bool,
}

impl AbortCandidateOp<'_> {
    fn request(&self) -> SessionResult<CandidateRequest> {
        self.request
            .ok_or_else(|| SessionError::Internal("request not validated".into()))
    }
}

impl Operation for AbortCandidateOp<'_> {
    type Output = ();

    fn validate(&mut self) -> SessionResult<()> {
        self.request = Some(CandidateRequest::parse(self.args)?);
        Ok(())
    }

    fn get_exclusion(&mut self) -> SessionResult<()> {
        let request = self.request()?;
        let lock = &self.coordinator.lock;

        let data = lock.get_config_data(request.session_id)?;
        if data.config_id != request.config_id {
            return Err(LockError::InvalidConfigId {
                session_id: request.session_id,
                config_id: request.config_id,
            }
            .into());
        }
        lock.get_lock(
            request.session_id,
            LockOperation::AcquireWriteSession,
            Some(WriteType::AbortCandidateConfig),
            None,
            None,
        )?;
        self.holds_write = true;

        self.notice = Some(SessionNotice {
            kind: NoticeKind::CandidateAborted,
            session_id: request.session_id,
            config_id: request.config_id,
            mode: data.mode,
            vtn_name: data.vtn_name,
        });
        Ok(())
    }

    fn execute(&mut self) -> SessionResult<()> {
        let notice = self
            .notice
            .as_ref()
            .ok_or_else(|| SessionError::Internal("no notice built".into()))?;
        self.coordinator.announce(notice)
    }

    fn release_exclusion(&mut self) -> SessionResult<()> {
        let request = self.request()?;
        self.coordinator.lock.release_lock(
            request.session_id,
            request.config_id,
            LockOperation::AcquireWriteSession,
            Some(WriteType::AbortCandidateConfig),
        )?;
        self.holds_write = false;

        let session = request.session_id.to_string();
        let config_id = request.config_id.to_string();
        log_event_with_fields(
            Event::CandidateAborted,
            &[("config_id", &config_id), ("session_id", &session)],
        );
        Ok(())
    }

    fn revoke(&mut self, _failed: Phase) {
        if !self.holds_write {
            return;
        }
        if let Ok(request) = self.request() {
            let _ = self.coordinator.lock.release_lock(
                request.session_id,
                request.config_id,
                LockOperation::AcquireWriteSession,
                Some(WriteType::AbortCandidateConfig),
            );
        }
        self.holds_write = false;
    }

    fn into_output(self) {}
}
