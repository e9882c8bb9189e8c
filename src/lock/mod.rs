//! Config Lock Subsystem
//!
//! Decides who may configure what, right now, independent of business logic:
//! - which configuration scope (GLOBAL, REAL, VIRTUAL, or one VTN) is held
//! - by which session, under which config id
//! - which write session (commit, abort, audit, startup-config) is in flight
//! - which cluster state the process is in
//!
//! All mutation happens under a single mutex and nothing here blocks.
//!
//! Write-class precedence:
//! - a GLOBAL-key commit/abort excludes every other write
//! - audit and startup-config writes are system-wide and exclude every write
//! - REAL/VIRTUAL/VTN commit/abort exclude only writes on the same key

mod config_lock;
mod errors;
mod session;
mod state;

pub use config_lock::ConfigLock;
pub use errors::{LockError, LockResult};
pub use session::{
    ConfigData, ConfigSession, EvictedSession, LockGrant, LockOperation, NotifyKind,
    SessionPhase, WriteType,
};
pub use state::{ConfigMode, ModeKey, UncState};
