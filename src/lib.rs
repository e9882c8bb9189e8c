//! vtn-coordinator - configuration lock and transaction coordinator
//!
//! Serializes configuration sessions over the VTN configuration tree and
//! drives vote/commit/abort transactions across the southbound controllers.

pub mod cli;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod lock;
pub mod observability;
pub mod persistence;
pub mod registry;
pub mod rpc;
pub mod session;
pub mod status;
pub mod transaction;
