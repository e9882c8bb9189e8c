//! Persistence subsystem
//!
//! The coordinator does not own a database. It consumes a key-value accessor
//! and keeps two recovery hints in it:
//! - the `global-mode-dirty` flag, set while a GLOBAL session may have
//!   uncommitted candidate state
//! - the recovery record, written when a global commit fails

mod errors;
mod journal;
mod store;

pub use errors::{PersistenceError, PersistenceResult};
pub use journal::{RecoveryJournal, RecoveryRecord};
pub use store::{FileStore, KvStore, MemoryStore};
