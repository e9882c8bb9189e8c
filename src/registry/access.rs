//! Per-controller access guard
//!
//! A `ControllerAccess` is a lease on one controller's read or write slot.
//! It is granted by `ControllerRegistry::acquire` and released on drop, so
//! every exit path (including `?` and panics) gives the slot back.

use std::fmt;

use super::controller::{ConnectionStatus, ControllerInfo};
use super::errors::RegistryResult;
use super::table::ControllerRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Background polling and status reads; many may coexist
    Read,
    /// Configuration I/O; exclusive per controller
    Write,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::Read => write!(f, "READ"),
            AccessMode::Write => write!(f, "WRITE"),
        }
    }
}

/// Held read or write slot on one controller
pub struct ControllerAccess<'a> {
    registry: &'a ControllerRegistry,
    name: String,
    mode: AccessMode,
    info: ControllerInfo,
}

impl<'a> ControllerAccess<'a> {
    pub(crate) fn new(
        registry: &'a ControllerRegistry,
        mode: AccessMode,
        info: ControllerInfo,
    ) -> Self {
        Self {
            registry,
            name: info.name.clone(),
            mode,
            info,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Entry state at the moment access was granted
    pub fn info(&self) -> &ControllerInfo {
        &self.info
    }

    pub fn set_audit_result(&mut self, audit_result: bool) -> RegistryResult<()> {
        self.registry.with_entry(&self.name, |entry| {
            entry.audit_result = audit_result;
        })?;
        self.info.audit_result = audit_result;
        Ok(())
    }

    /// Record the connection status seen by a poll.
    ///
    /// Returns true when the status changed. Any change leaves the
    /// controller unaudited.
    pub fn set_connection_status(&mut self, status: ConnectionStatus) -> RegistryResult<bool> {
        let changed = self.registry.with_entry(&self.name, |entry| {
            if entry.connection_status == status {
                return false;
            }
            entry.connection_status = status;
            entry.audit_result = false;
            true
        })?;
        if changed {
            self.info.connection_status = status;
            self.info.audit_result = false;
        }
        Ok(changed)
    }
}

impl fmt::Debug for ControllerAccess<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerAccess")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .finish()
    }
}

impl Drop for ControllerAccess<'_> {
    fn drop(&mut self) {
        self.registry.release(&self.name, self.mode);
    }
}
