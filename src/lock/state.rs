//! Cluster state and configuration scopes
//!
//! `UncState` is process-wide and only moves through the membership callback.
//! Transitions are explicit and enumerable:
//!
//! ```text
//! INIT ──► ACT ──► ACT_FAIL ──► STOP
//!   │       ▲ │                  ▲
//!   └─► SBY ┘ └──────────────────┘
//! ```
//!
//! STOP is terminal.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::{LockError, LockResult};

/// Cluster role of this process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UncState {
    /// Starting up, no role yet
    Init,
    /// Active: accepts configuration
    Act,
    /// Standby: mirrors the active node
    Sby,
    /// Shutting down
    Stop,
    /// Active node that could not persist recovery state
    ActFail,
}

impl UncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UncState::Init => "INIT",
            UncState::Act => "ACT",
            UncState::Sby => "SBY",
            UncState::Stop => "STOP",
            UncState::ActFail => "ACT_FAIL",
        }
    }

    /// Whether the transition table permits `self → next`.
    ///
    /// Same-state updates are always permitted and are no-ops for callers.
    pub fn can_transition_to(&self, next: UncState) -> bool {
        if *self == next {
            return true;
        }
        match self {
            UncState::Init => matches!(next, UncState::Act | UncState::Sby | UncState::Stop),
            UncState::Sby => matches!(next, UncState::Act | UncState::Stop),
            UncState::Act => matches!(next, UncState::Sby | UncState::Stop | UncState::ActFail),
            UncState::ActFail => next == UncState::Stop,
            UncState::Stop => false,
        }
    }

    /// Validate and perform a transition.
    pub fn transition(self, next: UncState) -> LockResult<UncState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(LockError::InvalidUncState(format!(
                "{} -> {}",
                self.as_str(),
                next.as_str()
            )))
        }
    }

    /// Whether a transition into this state clears all sessions.
    pub fn resets_global_data(&self) -> bool {
        matches!(self, UncState::Act | UncState::Sby | UncState::Stop)
    }
}

impl fmt::Display for UncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for UncState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "init" => Ok(UncState::Init),
            "act" => Ok(UncState::Act),
            "sby" => Ok(UncState::Sby),
            "stop" => Ok(UncState::Stop),
            "act_fail" => Ok(UncState::ActFail),
            other => Err(format!("unknown UNC state '{}'", other)),
        }
    }
}

/// Granularity of an exclusive configuration session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigMode {
    Global,
    Real,
    Virtual,
    Vtn,
}

impl ConfigMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigMode::Global => "GLOBAL",
            ConfigMode::Real => "REAL",
            ConfigMode::Virtual => "VIRTUAL",
            ConfigMode::Vtn => "VTN",
        }
    }

    /// Wire encoding used in positional RPC arguments
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(ConfigMode::Global),
            1 => Some(ConfigMode::Real),
            2 => Some(ConfigMode::Virtual),
            3 => Some(ConfigMode::Vtn),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            ConfigMode::Global => 0,
            ConfigMode::Real => 1,
            ConfigMode::Virtual => 2,
            ConfigMode::Vtn => 3,
        }
    }
}

impl fmt::Display for ConfigMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Key of the config mode map
///
/// GLOBAL/REAL/VIRTUAL are singletons; every VTN name is its own key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModeKey {
    Global,
    Real,
    Virtual,
    Vtn(String),
}

impl ModeKey {
    /// Build the key for a mode. VTN mode requires a name.
    pub fn new(mode: ConfigMode, vtn_name: Option<&str>) -> LockResult<Self> {
        match (mode, vtn_name) {
            (ConfigMode::Global, _) => Ok(ModeKey::Global),
            (ConfigMode::Real, _) => Ok(ModeKey::Real),
            (ConfigMode::Virtual, _) => Ok(ModeKey::Virtual),
            (ConfigMode::Vtn, Some(name)) if !name.is_empty() => Ok(ModeKey::Vtn(name.to_string())),
            (ConfigMode::Vtn, _) => Err(LockError::InvalidOperation(
                "VTN mode requires a vtn name".into(),
            )),
        }
    }

    pub fn mode(&self) -> ConfigMode {
        match self {
            ModeKey::Global => ConfigMode::Global,
            ModeKey::Real => ConfigMode::Real,
            ModeKey::Virtual => ConfigMode::Virtual,
            ModeKey::Vtn(_) => ConfigMode::Vtn,
        }
    }

    pub fn vtn_name(&self) -> Option<&str> {
        match self {
            ModeKey::Vtn(name) => Some(name),
            _ => None,
        }
    }

    /// Map key as stored: `global-mode`, `real-mode`, `virtual-mode`, or the vtn name
    pub fn as_str(&self) -> &str {
        match self {
            ModeKey::Global => "global-mode",
            ModeKey::Real => "real-mode",
            ModeKey::Virtual => "virtual-mode",
            ModeKey::Vtn(name) => name,
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, ModeKey::Global)
    }
}

impl fmt::Display for ModeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
