//! Observable coordinator events
//!
//! Every line the coordinator logs names one of these events. The set is closed
//! so operators can alert on exact event names.

use std::fmt;

use super::logger::Severity;

/// Observable events in the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Boot & Lifecycle
    /// Process startup begins
    BootStart,
    /// Startup complete, ready to serve
    BootComplete,
    /// Configuration loaded
    ConfigLoaded,
    /// Reading RPC requests
    Serving,
    /// Shutdown initiated
    ShutdownStart,
    /// Shutdown complete, all waiters drained
    ShutdownComplete,

    // Cluster state
    /// UncState changed through the membership callback
    UncStateChanged,
    /// Sessions and wait structures cleared on a state transition
    GlobalDataReset,

    // Config sessions
    /// Config session acquired
    SessionAcquired,
    /// Config session released
    SessionReleased,
    /// Config session evicted by a force acquisition
    SessionEvicted,
    /// Acquisition rejected because the scope is held
    AcquisitionBusy,
    /// Timed acquisition parked on the wait queue
    AcquisitionQueued,
    /// Timed acquisition gave up after its deadline
    AcquisitionTimedOut,
    /// Parked acquisitions woken for a state transition
    AcquisitionQueueCleared,
    /// A participant rejected a session notice
    ParticipantNotifyFailed,

    // Transactions
    /// Vote phase begins for a batch
    CommitVoteBegin,
    /// A controller failed its vote
    CommitVoteFailed,
    /// A controller failed its global commit
    CommitGlobalFailed,
    /// Batch committed on every participating controller
    CommitComplete,
    /// Abort sent to the controllers of a failed batch
    CommitAborted,
    /// Candidate configuration discarded
    CandidateAborted,

    // Audit
    /// Audit started for a controller
    AuditStart,
    /// Audit completed successfully
    AuditComplete,
    /// Audit failed
    AuditFailed,
    /// Audit cancelled by request
    AuditCancelled,

    // Controllers
    /// Controller added to the registry
    ControllerAdded,
    /// Controller entry updated
    ControllerUpdated,
    /// Controller removed from the registry
    ControllerDeleted,
    /// Controller reachable again after a disconnect
    ControllerReconnected,
    /// Controller stopped answering pings
    ControllerDisconnected,

    // Recovery
    /// Recovery record found when becoming active
    RecoveryRecordFound,
    /// Durable recovery state could not be written (FATAL)
    PersistenceFailed,
    /// Repeated fatal failures escalated to an operator (FATAL)
    OperatorAlarm,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::BootStart => "TC_STARTUP_BEGIN",
            Event::BootComplete => "TC_STARTUP_COMPLETE",
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::Serving => "TC_SERVING",
            Event::ShutdownStart => "SHUTDOWN_START",
            Event::ShutdownComplete => "SHUTDOWN_COMPLETE",

            Event::UncStateChanged => "UNC_STATE_CHANGED",
            Event::GlobalDataReset => "GLOBAL_DATA_RESET",

            Event::SessionAcquired => "SESSION_ACQUIRED",
            Event::SessionReleased => "SESSION_RELEASED",
            Event::SessionEvicted => "SESSION_EVICTED",
            Event::AcquisitionBusy => "ACQUISITION_BUSY",
            Event::AcquisitionQueued => "ACQUISITION_QUEUED",
            Event::AcquisitionTimedOut => "ACQUISITION_TIMED_OUT",
            Event::AcquisitionQueueCleared => "ACQUISITION_QUEUE_CLEARED",
            Event::ParticipantNotifyFailed => "PARTICIPANT_NOTIFY_FAILED",

            Event::CommitVoteBegin => "COMMIT_VOTE_BEGIN",
            Event::CommitVoteFailed => "COMMIT_VOTE_FAILED",
            Event::CommitGlobalFailed => "COMMIT_GLOBAL_FAILED",
            Event::CommitComplete => "COMMIT_COMPLETE",
            Event::CommitAborted => "COMMIT_ABORTED",
            Event::CandidateAborted => "CANDIDATE_ABORTED",

            Event::AuditStart => "AUDIT_BEGIN",
            Event::AuditComplete => "AUDIT_COMPLETE",
            Event::AuditFailed => "AUDIT_FAILED",
            Event::AuditCancelled => "AUDIT_CANCELLED",

            Event::ControllerAdded => "CONTROLLER_ADDED",
            Event::ControllerUpdated => "CONTROLLER_UPDATED",
            Event::ControllerDeleted => "CONTROLLER_DELETED",
            Event::ControllerReconnected => "CONTROLLER_RECONNECTED",
            Event::ControllerDisconnected => "CONTROLLER_DISCONNECTED",

            Event::RecoveryRecordFound => "RECOVERY_RECORD_FOUND",
            Event::PersistenceFailed => "PERSISTENCE_FAILED",
            Event::OperatorAlarm => "OPERATOR_ALARM",
        }
    }

    /// Severity the event is logged at.
    ///
    /// Contention outcomes are expected and retryable, so they stay at TRACE.
    pub fn severity(&self) -> Severity {
        match self {
            Event::AcquisitionBusy | Event::AcquisitionQueued => Severity::Trace,
            Event::AcquisitionTimedOut
            | Event::ParticipantNotifyFailed
            | Event::CommitVoteFailed
            | Event::CommitAborted
            | Event::AuditFailed
            | Event::ControllerDisconnected
            | Event::RecoveryRecordFound => Severity::Warn,
            Event::CommitGlobalFailed => Severity::Error,
            Event::PersistenceFailed | Event::OperatorAlarm => Severity::Fatal,
            _ => Severity::Info,
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
