//! Controller registry
//!
//! One registry-wide mutex guards the map and every per-controller counter.
//! It is held only for O(1) bookkeeping; controller I/O runs under a
//! `ControllerAccess` lease with the mutex released.
//!
//! Access rules per controller:
//! - a controller marked for delete is invisible to new access
//! - READ waits while an update is pending, a write is in progress, or a
//!   writer is queued
//! - WRITE waits while an update is pending, another write is in progress,
//!   or readers are active
//! - update and delete wait until no reader or writer remains

use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard};

use super::access::{AccessMode, ControllerAccess};
use super::controller::{ControllerEntry, ControllerInfo, DriverType};
use super::errors::{RegistryError, RegistryResult};
use crate::observability::{log_event_with_fields, Event};

#[derive(Debug, Default)]
struct RegistryInner {
    controllers: HashMap<String, ControllerEntry>,
    /// Registration order
    order: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ControllerRegistry {
    inner: Mutex<RegistryInner>,
}

type InnerGuard<'a> = MutexGuard<'a, RegistryInner>;

fn wait_on<'a>(cv: &Condvar, guard: InnerGuard<'a>) -> RegistryResult<InnerGuard<'a>> {
    cv.wait(guard).map_err(|_| RegistryError::poisoned())
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> RegistryResult<InnerGuard<'_>> {
        self.inner.lock().map_err(|_| RegistryError::poisoned())
    }

    // =========================================================================
    // ADMINISTRATION
    // =========================================================================

    pub fn add(&self, name: &str, driver_type: DriverType) -> RegistryResult<()> {
        if name.trim().is_empty() {
            return Err(RegistryError::InvalidName(name.to_string()));
        }

        let mut inner = self.inner()?;
        if inner.controllers.contains_key(name) {
            return Err(RegistryError::AlreadyExists(name.to_string()));
        }
        inner
            .controllers
            .insert(name.to_string(), ControllerEntry::new(name, driver_type));
        inner.order.push(name.to_string());
        drop(inner);

        log_event_with_fields(
            Event::ControllerAdded,
            &[("controller", name), ("driver_type", driver_type.as_str())],
        );
        Ok(())
    }

    /// Change a controller's driver type once no reader or writer holds it.
    ///
    /// New reads and writes park until the update finishes. The controller
    /// must be audited again afterwards.
    pub fn update(&self, name: &str, driver_type: DriverType) -> RegistryResult<()> {
        let mut inner = self.inner()?;

        // One updater at a time
        loop {
            let entry = Self::visible(&mut inner, name)?;
            if !entry.marked_for_update {
                entry.marked_for_update = true;
                break;
            }
            let cv = entry.idle_cv.clone();
            inner = wait_on(&cv, inner)?;
        }

        loop {
            let entry = Self::visible(&mut inner, name)?;
            if entry.can_delete_update() {
                entry.driver_type = driver_type;
                entry.audit_result = false;
                entry.marked_for_update = false;
                entry.wake_all();
                break;
            }
            let cv = entry.idle_cv.clone();
            inner = wait_on(&cv, inner)?;
        }
        drop(inner);

        log_event_with_fields(
            Event::ControllerUpdated,
            &[("controller", name), ("driver_type", driver_type.as_str())],
        );
        Ok(())
    }

    /// Remove a controller once its last reader and writer are gone.
    ///
    /// The controller becomes invisible to new access immediately.
    pub fn delete(&self, name: &str) -> RegistryResult<()> {
        let mut inner = self.inner()?;
        Self::visible(&mut inner, name)?.marked_for_delete = true;

        loop {
            let entry = inner
                .controllers
                .get(name)
                .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
            if entry.can_delete_update() {
                break;
            }
            let cv = entry.idle_cv.clone();
            inner = wait_on(&cv, inner)?;
        }

        if let Some(entry) = inner.controllers.remove(name) {
            entry.wake_all();
        }
        inner.order.retain(|n| n != name);
        drop(inner);

        log_event_with_fields(Event::ControllerDeleted, &[("controller", name)]);
        Ok(())
    }

    /// All controllers in registration order
    pub fn list(&self) -> RegistryResult<Vec<ControllerInfo>> {
        let inner = self.inner()?;
        Ok(inner
            .order
            .iter()
            .filter_map(|name| inner.controllers.get(name))
            .map(ControllerEntry::info)
            .collect())
    }

    /// Names of all visible controllers in registration order
    pub fn names(&self) -> RegistryResult<Vec<String>> {
        let inner = self.inner()?;
        Ok(inner
            .order
            .iter()
            .filter(|name| {
                inner
                    .controllers
                    .get(name.as_str())
                    .map(|e| !e.marked_for_delete)
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    pub fn status(&self, name: &str) -> RegistryResult<ControllerInfo> {
        let inner = self.inner()?;
        inner
            .controllers
            .get(name)
            .map(ControllerEntry::info)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> RegistryResult<bool> {
        Ok(self.inner()?.controllers.contains_key(name))
    }

    // =========================================================================
    // ACCESS GUARD
    // =========================================================================

    /// Block until `mode` access on `name` is granted.
    ///
    /// There is no timeout; the wait ends when the conflicting party
    /// releases or the controller is deleted.
    pub fn acquire(&self, name: &str, mode: AccessMode) -> RegistryResult<ControllerAccess<'_>> {
        let mut inner = self.inner()?;

        loop {
            let entry = Self::visible(&mut inner, name)?;
            let blocked = match mode {
                AccessMode::Read => {
                    entry.marked_for_update || entry.write_in_progress || entry.write_wait_count > 0
                }
                AccessMode::Write => {
                    entry.marked_for_update || entry.write_in_progress || entry.read_count > 0
                }
            };

            if !blocked {
                match mode {
                    AccessMode::Read => entry.read_count += 1,
                    AccessMode::Write => entry.write_in_progress = true,
                }
                let info = entry.info();
                return Ok(ControllerAccess::new(self, mode, info));
            }

            let cv = match mode {
                AccessMode::Read => {
                    entry.read_wait_count += 1;
                    entry.read_cv.clone()
                }
                AccessMode::Write => {
                    entry.write_wait_count += 1;
                    entry.write_cv.clone()
                }
            };
            inner = wait_on(&cv, inner)?;

            if let Some(entry) = inner.controllers.get_mut(name) {
                match mode {
                    AccessMode::Read => entry.read_wait_count = entry.read_wait_count.saturating_sub(1),
                    AccessMode::Write => {
                        entry.write_wait_count = entry.write_wait_count.saturating_sub(1)
                    }
                }
            }
        }
    }

    /// Give back a slot. Called from `ControllerAccess::drop`.
    pub(crate) fn release(&self, name: &str, mode: AccessMode) {
        // Releasing must never leak a slot, even after a panic elsewhere.
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(entry) = inner.controllers.get_mut(name) else {
            return;
        };

        match mode {
            AccessMode::Read => {
                entry.read_count = entry.read_count.saturating_sub(1);
                if entry.read_count == 0 && entry.write_wait_count > 0 {
                    entry.write_cv.notify_one();
                }
            }
            AccessMode::Write => {
                entry.write_in_progress = false;
                if entry.write_wait_count > 0 {
                    entry.write_cv.notify_one();
                } else if entry.read_wait_count > 0 {
                    entry.read_cv.notify_all();
                }
            }
        }

        if entry.can_delete_update() && (entry.marked_for_update || entry.marked_for_delete) {
            entry.idle_cv.notify_all();
        }
    }

    /// Mutate a live entry under the registry mutex
    pub(crate) fn with_entry<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut ControllerEntry) -> T,
    ) -> RegistryResult<T> {
        let mut inner = self.inner()?;
        inner
            .controllers
            .get_mut(name)
            .map(f)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    fn visible<'g>(
        inner: &'g mut InnerGuard<'_>,
        name: &str,
    ) -> RegistryResult<&'g mut ControllerEntry> {
        match inner.controllers.get_mut(name) {
            Some(entry) if !entry.marked_for_delete => Ok(entry),
            _ => Err(RegistryError::NotFound(name.to_string())),
        }
    }
}
