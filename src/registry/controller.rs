//! Controller metadata

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Condvar};

use serde::{Deserialize, Serialize};

/// Southbound driver family a controller is reached through
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverType {
    Pfc,
    Vnp,
    Polc,
    Odc,
}

impl DriverType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverType::Pfc => "pfc",
            DriverType::Vnp => "vnp",
            DriverType::Polc => "polc",
            DriverType::Odc => "odc",
        }
    }
}

impl fmt::Display for DriverType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DriverType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pfc" => Ok(DriverType::Pfc),
            "vnp" => Ok(DriverType::Vnp),
            "polc" => Ok(DriverType::Polc),
            "odc" => Ok(DriverType::Odc),
            other => Err(format!("unknown driver type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionStatus {
    Up,
    Down,
}

/// Point-in-time view of a controller entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerInfo {
    pub name: String,
    pub driver_type: DriverType,
    pub connection_status: ConnectionStatus,
    pub audit_result: bool,
    pub read_count: u32,
    pub write_in_progress: bool,
    pub marked_for_update: bool,
    pub marked_for_delete: bool,
}

/// Registry-owned entry. Counters are only touched under the registry mutex.
#[derive(Debug)]
pub(crate) struct ControllerEntry {
    pub(crate) name: String,
    pub(crate) driver_type: DriverType,
    pub(crate) connection_status: ConnectionStatus,
    pub(crate) audit_result: bool,
    pub(crate) read_count: u32,
    pub(crate) write_in_progress: bool,
    pub(crate) read_wait_count: u32,
    pub(crate) write_wait_count: u32,
    pub(crate) marked_for_update: bool,
    pub(crate) marked_for_delete: bool,
    /// Waiting readers
    pub(crate) read_cv: Arc<Condvar>,
    /// Waiting writers
    pub(crate) write_cv: Arc<Condvar>,
    /// Waiting updaters and deleters
    pub(crate) idle_cv: Arc<Condvar>,
}

impl ControllerEntry {
    pub(crate) fn new(name: &str, driver_type: DriverType) -> Self {
        Self {
            name: name.to_string(),
            driver_type,
            connection_status: ConnectionStatus::Down,
            audit_result: false,
            read_count: 0,
            write_in_progress: false,
            read_wait_count: 0,
            write_wait_count: 0,
            marked_for_update: false,
            marked_for_delete: false,
            read_cv: Arc::new(Condvar::new()),
            write_cv: Arc::new(Condvar::new()),
            idle_cv: Arc::new(Condvar::new()),
        }
    }

    /// No outstanding readers or writers
    pub(crate) fn can_delete_update(&self) -> bool {
        self.read_count == 0 && !self.write_in_progress
    }

    pub(crate) fn info(&self) -> ControllerInfo {
        ControllerInfo {
            name: self.name.clone(),
            driver_type: self.driver_type,
            connection_status: self.connection_status,
            audit_result: self.audit_result,
            read_count: self.read_count,
            write_in_progress: self.write_in_progress,
            marked_for_update: self.marked_for_update,
            marked_for_delete: self.marked_for_delete,
        }
    }

    pub(crate) fn wake_all(&self) {
        self.read_cv.notify_all();
        self.write_cv.notify_all();
        self.idle_cv.notify_all();
    }
}
