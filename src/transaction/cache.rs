//! Pending command cache for non-2PC controllers
//!
//! Controllers whose driver has no separate vote phase receive configuration
//! as an ordered list of create/update/delete commands, replayed during the
//! vote. Each cache entry carries a typed object; the handler is looked up by
//! the object's kind.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{TransactionError, TransactionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Vtn,
    Vbridge,
    VbrIf,
    Vlink,
    FlowList,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 5] = [
        ObjectKind::Vtn,
        ObjectKind::Vbridge,
        ObjectKind::VbrIf,
        ObjectKind::Vlink,
        ObjectKind::FlowList,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Vtn => "vtn",
            ObjectKind::Vbridge => "vbridge",
            ObjectKind::VbrIf => "vbr_if",
            ObjectKind::Vlink => "vlink",
            ObjectKind::FlowList => "flow_list",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One configuration object as pushed southbound
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfigObject {
    Vtn {
        vtn_name: String,
        #[serde(default)]
        description: Option<String>,
    },
    Vbridge {
        vtn_name: String,
        vbr_name: String,
        #[serde(default)]
        domain_id: Option<String>,
    },
    VbrIf {
        vtn_name: String,
        vbr_name: String,
        if_name: String,
        #[serde(default)]
        port: Option<String>,
    },
    Vlink {
        vtn_name: String,
        vlink_name: String,
        node1: String,
        node2: String,
    },
    FlowList {
        name: String,
        #[serde(default)]
        entries: Vec<String>,
    },
}

impl ConfigObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ConfigObject::Vtn { .. } => ObjectKind::Vtn,
            ConfigObject::Vbridge { .. } => ObjectKind::Vbridge,
            ConfigObject::VbrIf { .. } => ObjectKind::VbrIf,
            ConfigObject::Vlink { .. } => ObjectKind::Vlink,
            ConfigObject::FlowList { .. } => ObjectKind::FlowList,
        }
    }

    /// Hierarchical key, e.g. `vtn1/vbr1/if1`
    pub fn key(&self) -> String {
        match self {
            ConfigObject::Vtn { vtn_name, .. } => vtn_name.clone(),
            ConfigObject::Vbridge {
                vtn_name, vbr_name, ..
            } => format!("{}/{}", vtn_name, vbr_name),
            ConfigObject::VbrIf {
                vtn_name,
                vbr_name,
                if_name,
                ..
            } => format!("{}/{}/{}", vtn_name, vbr_name, if_name),
            ConfigObject::Vlink {
                vtn_name,
                vlink_name,
                ..
            } => format!("{}/{}", vtn_name, vlink_name),
            ConfigObject::FlowList { name, .. } => name.clone(),
        }
    }

    /// Full object body for diagnostics
    pub fn value_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandOp {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEntry {
    pub op: CommandOp,
    pub object: ConfigObject,
}

impl CommandEntry {
    pub fn new(op: CommandOp, object: ConfigObject) -> Self {
        Self { op, object }
    }
}

/// Per-controller ordered command lists
#[derive(Debug, Default)]
pub struct CommandCache {
    pending: Mutex<HashMap<String, VecDeque<CommandEntry>>>,
}

impl CommandCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> TransactionResult<MutexGuard<'_, HashMap<String, VecDeque<CommandEntry>>>> {
        self.pending
            .lock()
            .map_err(|_| TransactionError::Internal("command cache mutex poisoned".into()))
    }

    pub fn enqueue(&self, controller: &str, entry: CommandEntry) -> TransactionResult<()> {
        self.pending()?
            .entry(controller.to_string())
            .or_default()
            .push_back(entry);
        Ok(())
    }

    /// Remove and return every pending command for `controller`, in order
    pub fn take(&self, controller: &str) -> TransactionResult<Vec<CommandEntry>> {
        Ok(self
            .pending()?
            .remove(controller)
            .map(Vec::from)
            .unwrap_or_default())
    }

    pub fn len(&self, controller: &str) -> TransactionResult<usize> {
        Ok(self.pending()?.get(controller).map(VecDeque::len).unwrap_or(0))
    }

    pub fn discard(&self, controller: &str) -> TransactionResult<()> {
        self.pending()?.remove(controller);
        Ok(())
    }
}
