//! Southbound driver capability
//!
//! The coordinator never speaks a controller protocol itself. Each driver
//! family registers one `DriverCapability`, plus per-object-kind command
//! handlers when it applies configuration from the command cache.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::cache::{CommandOp, ConfigObject, ObjectKind};
use super::errors::{DriverError, TransactionError, TransactionResult};
use crate::registry::DriverType;

pub type DriverResult<T> = Result<T, DriverError>;

/// Physical configuration read back from a controller during audit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhysicalSnapshot {
    pub controller: String,
    pub fetched_at: DateTime<Utc>,
    pub objects: Vec<ConfigObject>,
}

/// Actions a driver performs against one of its controllers
pub trait DriverCapability: Send + Sync {
    fn driver_type(&self) -> DriverType;

    /// Whether vote and commit are separate phases for this driver
    fn is_two_phase_commit_needed(&self) -> bool;

    fn vote(&self, controller: &str, config_id: u32) -> DriverResult<()>;

    fn commit(&self, controller: &str, config_id: u32) -> DriverResult<()>;

    fn abort(&self, controller: &str, config_id: u32) -> DriverResult<()>;

    fn ping(&self, controller: &str) -> bool;

    fn fetch_physical_config(&self, controller: &str) -> DriverResult<PhysicalSnapshot>;
}

/// Applies one cached command of a given object kind
pub trait CommandHandler: Send + Sync {
    fn apply(&self, controller: &str, op: CommandOp, object: &ConfigObject) -> DriverResult<()>;
}

struct Registration {
    driver: Arc<dyn DriverCapability>,
    handlers: HashMap<ObjectKind, Arc<dyn CommandHandler>>,
}

/// Driver family -> capability and command handlers
#[derive(Default)]
pub struct DriverTable {
    registrations: RwLock<HashMap<DriverType, Registration>>,
}

impl DriverTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> TransactionError {
        TransactionError::Internal("driver table lock poisoned".into())
    }

    /// Register (or replace) the driver for its family. Handlers are kept.
    pub fn register(&self, driver: Arc<dyn DriverCapability>) -> TransactionResult<()> {
        let mut registrations = self.registrations.write().map_err(|_| Self::poisoned())?;
        let driver_type = driver.driver_type();
        match registrations.get_mut(&driver_type) {
            Some(existing) => existing.driver = driver,
            None => {
                registrations.insert(
                    driver_type,
                    Registration {
                        driver,
                        handlers: HashMap::new(),
                    },
                );
            }
        }
        Ok(())
    }

    pub fn register_handler(
        &self,
        driver_type: DriverType,
        kind: ObjectKind,
        handler: Arc<dyn CommandHandler>,
    ) -> TransactionResult<()> {
        let mut registrations = self.registrations.write().map_err(|_| Self::poisoned())?;
        let registration = registrations
            .get_mut(&driver_type)
            .ok_or(TransactionError::NoDriver(driver_type))?;
        registration.handlers.insert(kind, handler);
        Ok(())
    }

    /// Register a loopback driver as both capability and handler for every kind
    pub fn register_loopback(&self, driver: Arc<LoopbackDriver>) -> TransactionResult<()> {
        let driver_type = driver.driver_type();
        self.register(driver.clone())?;
        for kind in ObjectKind::ALL {
            self.register_handler(driver_type, kind, driver.clone())?;
        }
        Ok(())
    }

    pub fn get(&self, driver_type: DriverType) -> TransactionResult<Arc<dyn DriverCapability>> {
        let registrations = self.registrations.read().map_err(|_| Self::poisoned())?;
        registrations
            .get(&driver_type)
            .map(|r| r.driver.clone())
            .ok_or(TransactionError::NoDriver(driver_type))
    }

    pub fn handler(
        &self,
        driver_type: DriverType,
        kind: ObjectKind,
    ) -> TransactionResult<Option<Arc<dyn CommandHandler>>> {
        let registrations = self.registrations.read().map_err(|_| Self::poisoned())?;
        Ok(registrations
            .get(&driver_type)
            .and_then(|r| r.handlers.get(&kind).cloned()))
    }
}

impl std::fmt::Debug for DriverTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let types: Vec<DriverType> = self
            .registrations
            .read()
            .map(|r| r.keys().copied().collect())
            .unwrap_or_default();
        f.debug_struct("DriverTable").field("drivers", &types).finish()
    }
}

// =============================================================================
// LOOPBACK DRIVER
// =============================================================================

#[derive(Debug, Default)]
struct LoopbackState {
    unreachable: HashSet<String>,
    applied: HashMap<String, BTreeMap<String, ConfigObject>>,
}

/// In-process driver that keeps applied objects in memory.
///
/// Used by `serve` when no real southbound driver is wired in.
#[derive(Debug)]
pub struct LoopbackDriver {
    driver_type: DriverType,
    two_phase: bool,
    state: Mutex<LoopbackState>,
}

impl LoopbackDriver {
    pub fn new(driver_type: DriverType, two_phase: bool) -> Self {
        Self {
            driver_type,
            two_phase,
            state: Mutex::new(LoopbackState::default()),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut LoopbackState) -> T) -> DriverResult<T> {
        self.state
            .lock()
            .map(|mut state| f(&mut state))
            .map_err(|_| DriverError::new("loopback state poisoned"))
    }

    pub fn set_reachable(&self, controller: &str, reachable: bool) {
        let _ = self.with_state(|state| {
            if reachable {
                state.unreachable.remove(controller);
            } else {
                state.unreachable.insert(controller.to_string());
            }
        });
    }

    /// Objects currently applied on `controller`, ordered by key
    pub fn applied(&self, controller: &str) -> Vec<ConfigObject> {
        self.with_state(|state| {
            state
                .applied
                .get(controller)
                .map(|objects| objects.values().cloned().collect())
                .unwrap_or_default()
        })
        .unwrap_or_default()
    }

    fn require_reachable(&self, controller: &str) -> DriverResult<()> {
        let reachable = self.with_state(|state| !state.unreachable.contains(controller))?;
        if reachable {
            Ok(())
        } else {
            Err(DriverError::new(format!("{} unreachable", controller)))
        }
    }
}

impl DriverCapability for LoopbackDriver {
    fn driver_type(&self) -> DriverType {
        self.driver_type
    }

    fn is_two_phase_commit_needed(&self) -> bool {
        self.two_phase
    }

    fn vote(&self, controller: &str, _config_id: u32) -> DriverResult<()> {
        self.require_reachable(controller)
    }

    fn commit(&self, controller: &str, _config_id: u32) -> DriverResult<()> {
        self.require_reachable(controller)
    }

    fn abort(&self, _controller: &str, _config_id: u32) -> DriverResult<()> {
        Ok(())
    }

    fn ping(&self, controller: &str) -> bool {
        self.require_reachable(controller).is_ok()
    }

    fn fetch_physical_config(&self, controller: &str) -> DriverResult<PhysicalSnapshot> {
        self.require_reachable(controller)?;
        Ok(PhysicalSnapshot {
            controller: controller.to_string(),
            fetched_at: Utc::now(),
            objects: self.applied(controller),
        })
    }
}

impl CommandHandler for LoopbackDriver {
    fn apply(&self, controller: &str, op: CommandOp, object: &ConfigObject) -> DriverResult<()> {
        self.require_reachable(controller)?;
        let key = object.key();
        self.with_state(|state| {
            let objects = state.applied.entry(controller.to_string()).or_default();
            match op {
                CommandOp::Create | CommandOp::Update => {
                    objects.insert(key, object.clone());
                    Ok(())
                }
                CommandOp::Delete => objects
                    .remove(&key)
                    .map(|_| ())
                    .ok_or_else(|| DriverError::new(format!("{} does not exist", key))),
            }
        })?
    }
}
