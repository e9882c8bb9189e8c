//! Service dispatch
//!
//! Maps the typed RPC surface onto the coordinator: CONFIG and
//! ABORT_CANDIDATE go to the session coordinator, CANDIDATE (commit) and
//! AUDIT run under a write session against the transaction coordinator, and
//! CONTROLLER administers the registry. READ, READ_STATUS, STARTUP_DB and
//! AUTO_SAVE answer `SERVICE_NOT_SUPPORTED`.

mod admin;
mod dispatcher;
mod lease;

pub use admin::ControllerCommand;
pub use dispatcher::ServiceDispatcher;
pub use lease::WriteLease;
