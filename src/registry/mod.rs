//! Controller Registry
//!
//! Owns the set of known controller connections and the per-controller
//! access guard that keeps configuration writes apart from background
//! polling and from deletion, without blocking unrelated controllers.

mod access;
mod controller;
mod errors;
mod poller;
mod table;

pub use access::{AccessMode, ControllerAccess};
pub use controller::{ConnectionStatus, ControllerInfo, DriverType};
pub use errors::{RegistryError, RegistryResult};
pub use poller::{ConnectivityPoller, PollReport};
pub use table::ControllerRegistry;
