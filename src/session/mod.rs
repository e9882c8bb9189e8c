//! Config session coordination
//!
//! Client-facing side of the config lock: argument validation for the
//! CONFIG service, the FIFO wait queue behind timed acquisition, participant
//! notification, and the global-mode-dirty recovery hint.
//!
//! # Timed acquisition
//!
//! A zero timeout never waits. Otherwise an acquisition that cannot be
//! granted (or arrives while others are already waiting) parks at the tail
//! of the queue. Each release wakes exactly the head, which retries once and
//! leaves the queue whatever the outcome. Leaving ACT cancels every waiter.

mod coordinator;
mod errors;
mod participant;
mod pipeline;
mod request;
mod wait_queue;

pub use coordinator::ConfigSessionCoordinator;
pub use errors::{ParticipantError, SessionError, SessionResult};
pub use participant::{NoticeKind, Participant, RecordingParticipant, SessionNotice};
pub use pipeline::{run_phases, Operation, Phase, PhaseFailure};
pub use request::{validate_vtn_name, CandidateRequest, ConfigOperation, ConfigRequest};
pub use wait_queue::AcquisitionQueue;
