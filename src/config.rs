//! Coordinator configuration file
//!
//! A JSON object; every field except `data_dir` has a default. Loading
//! always validates.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::{CliError, CliResult};
use crate::lock::UncState;
use crate::observability::Severity;
use crate::registry::DriverType;

/// One statically configured controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub name: String,
    pub driver_type: DriverType,
    /// Whether the driver votes before committing
    #[serde(default)]
    pub two_phase: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Data directory (required)
    pub data_dir: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Cluster role at boot
    #[serde(default = "default_initial_state")]
    pub initial_state: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Consecutive persistence failures before the operator alarm
    #[serde(default = "default_max_persist_failures")]
    pub max_persist_failures: u32,

    /// Failovers tolerated while a recovery record is outstanding
    #[serde(default = "default_max_failover_attempts")]
    pub max_failover_attempts: u32,

    #[serde(default)]
    pub controllers: Vec<ControllerConfig>,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_initial_state() -> String {
    "act".to_string()
}
fn default_poll_interval_ms() -> u64 {
    5000
}
fn default_max_persist_failures() -> u32 {
    3
}
fn default_max_failover_attempts() -> u32 {
    3
}

impl CoordinatorConfig {
    /// Configuration with every default and the given data directory
    pub fn with_data_dir(data_dir: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            log_level: default_log_level(),
            initial_state: default_initial_state(),
            poll_interval_ms: default_poll_interval_ms(),
            max_persist_failures: default_max_persist_failures(),
            max_failover_attempts: default_max_failover_attempts(),
            controllers: Vec::new(),
        }
    }

    pub fn load(path: &Path) -> CliResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| CliError::config_error(format!("Failed to read config: {}", e)))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> CliResult<Self> {
        let config: CoordinatorConfig = serde_json::from_str(content)
            .map_err(|e| CliError::config_error(format!("Invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CliResult<()> {
        if self.data_dir.trim().is_empty() {
            return Err(CliError::config_error("data_dir must not be empty"));
        }
        self.severity()?;
        match self.unc_state()? {
            UncState::Init | UncState::Act | UncState::Sby => {}
            other => {
                return Err(CliError::config_error(format!(
                    "initial_state cannot be '{}'",
                    other
                )))
            }
        }
        if self.poll_interval_ms == 0 {
            return Err(CliError::config_error("poll_interval_ms must be > 0"));
        }
        if self.max_persist_failures == 0 {
            return Err(CliError::config_error("max_persist_failures must be > 0"));
        }
        if self.max_failover_attempts == 0 {
            return Err(CliError::config_error("max_failover_attempts must be > 0"));
        }

        let mut names = HashSet::new();
        // Drivers are registered per type, so a type has one commit style
        let mut two_phase_by_type: HashMap<DriverType, bool> = HashMap::new();
        for controller in &self.controllers {
            if controller.name.trim().is_empty() {
                return Err(CliError::config_error("controller name must not be empty"));
            }
            if !names.insert(controller.name.as_str()) {
                return Err(CliError::config_error(format!(
                    "duplicate controller '{}'",
                    controller.name
                )));
            }
            let expected = *two_phase_by_type
                .entry(controller.driver_type)
                .or_insert(controller.two_phase);
            if expected != controller.two_phase {
                return Err(CliError::config_error(format!(
                    "controllers of driver type {} disagree on two_phase",
                    controller.driver_type.as_str()
                )));
            }
        }

        Ok(())
    }

    pub fn data_path(&self) -> &Path {
        Path::new(&self.data_dir)
    }

    pub fn severity(&self) -> CliResult<Severity> {
        self.log_level.parse().map_err(CliError::config_error)
    }

    pub fn unc_state(&self) -> CliResult<UncState> {
        self.initial_state.parse().map_err(CliError::config_error)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::from_json(r#"{"data_dir": "/var/lib/vtn"}"#).unwrap();
        assert_eq!(config, CoordinatorConfig::with_data_dir("/var/lib/vtn"));
        assert_eq!(config.severity().unwrap(), Severity::Info);
        assert_eq!(config.unc_state().unwrap(), UncState::Act);
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_controllers() {
        let config = CoordinatorConfig::from_json(
            r#"{
                "data_dir": "/tmp/x",
                "controllers": [
                    {"name": "pfc1", "driver_type": "pfc", "two_phase": true},
                    {"name": "vnp1", "driver_type": "vnp"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.controllers.len(), 2);
        assert!(config.controllers[0].two_phase);
        assert_eq!(config.controllers[1].driver_type, DriverType::Vnp);
        assert!(!config.controllers[1].two_phase);
    }

    #[test]
    fn test_rejections() {
        let cases = [
            r#"{}"#,
            r#"{"data_dir": ""}"#,
            r#"{"data_dir": "/x", "log_level": "loud"}"#,
            r#"{"data_dir": "/x", "initial_state": "stop"}"#,
            r#"{"data_dir": "/x", "initial_state": "primary"}"#,
            r#"{"data_dir": "/x", "poll_interval_ms": 0}"#,
            r#"{"data_dir": "/x", "max_persist_failures": 0}"#,
            r#"{"data_dir": "/x", "max_failover_attempts": 0}"#,
            r#"{"data_dir": "/x", "controllers": [{"name": "", "driver_type": "pfc"}]}"#,
            r#"{"data_dir": "/x", "controllers": [{"name": "c", "driver_type": "pfc"}, {"name": "c", "driver_type": "vnp"}]}"#,
            r#"{"data_dir": "/x", "controllers": [{"name": "a", "driver_type": "pfc", "two_phase": true}, {"name": "b", "driver_type": "pfc"}]}"#,
            r#"{"data_dir": "/x", "controllers": [{"name": "a", "driver_type": "xyz"}]}"#,
        ];
        for case in cases {
            let err = CoordinatorConfig::from_json(case).unwrap_err();
            assert_eq!(err.code_str(), "VTN_CLI_CONFIG_ERROR", "{}", case);
        }
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vtn.json");
        fs::write(&path, r#"{"data_dir": "/tmp/vtn", "log_level": "trace"}"#).unwrap();

        let config = CoordinatorConfig::load(&path).unwrap();
        assert_eq!(config.severity().unwrap(), Severity::Trace);

        assert!(CoordinatorConfig::load(&dir.path().join("missing.json")).is_err());
    }
}
