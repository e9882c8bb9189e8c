//! Transaction subsystem
//!
//! Two-phase commit and audit orchestration across controllers:
//! - `TransactionCoordinator`: vote, global commit, global abort
//! - audit pipeline: start, transaction, end, cancel
//! - `DriverCapability` / `CommandHandler`: what a southbound driver provides
//! - `CommandCache`: ordered commands for drivers without a vote phase

mod audit;
mod cache;
mod coordinator;
mod driver;
mod errors;

pub use audit::AuditType;
pub use cache::{CommandCache, CommandEntry, CommandOp, ConfigObject, ObjectKind};
pub use coordinator::{
    CommitBatch, CommitOutcome, CommitScope, FailedObject, TransactionCoordinator,
    TransactionPhaseResult,
};
pub use driver::{
    CommandHandler, DriverCapability, DriverResult, DriverTable, LoopbackDriver, PhysicalSnapshot,
};
pub use errors::{DriverError, TransactionError, TransactionResult};
