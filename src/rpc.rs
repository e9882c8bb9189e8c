//! Typed RPC surface
//!
//! A call is a service id plus ordered, typed positional arguments; a
//! response is a status followed by ordered typed outputs. The transport is
//! not modeled here.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::status::StatusCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceId {
    Config,
    Candidate,
    AbortCandidate,
    Audit,
    Controller,
    Read,
    ReadStatus,
    StartupDb,
    AutoSave,
}

impl ServiceId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceId::Config => "CONFIG",
            ServiceId::Candidate => "CANDIDATE",
            ServiceId::AbortCandidate => "ABORT_CANDIDATE",
            ServiceId::Audit => "AUDIT",
            ServiceId::Controller => "CONTROLLER",
            ServiceId::Read => "READ",
            ServiceId::ReadStatus => "READ_STATUS",
            ServiceId::StartupDb => "STARTUP_DB",
            ServiceId::AutoSave => "AUTO_SAVE",
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One positional argument or output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum RpcArg {
    U32(u32),
    I32(i32),
    U8(u8),
    Str(String),
}

impl RpcArg {
    pub fn type_name(&self) -> &'static str {
        match self {
            RpcArg::U32(_) => "u32",
            RpcArg::I32(_) => "i32",
            RpcArg::U8(_) => "u8",
            RpcArg::Str(_) => "str",
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            RpcArg::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            RpcArg::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> Option<u8> {
        match self {
            RpcArg::U8(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RpcArg::Str(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Client correlation id, echoed as the response's `request_id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub service: ServiceId,
    #[serde(default)]
    pub args: Vec<RpcArg>,
}

impl RpcRequest {
    pub fn new(service: ServiceId, args: Vec<RpcArg>) -> Self {
        Self {
            id: None,
            service,
            args,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub request_id: String,
    pub status: StatusCode,
    #[serde(default)]
    pub outputs: Vec<RpcArg>,
    /// Per-controller results and diagnostics, when the service has any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl RpcResponse {
    pub fn new(request_id: impl Into<String>, status: StatusCode) -> Self {
        Self {
            request_id: request_id.into(),
            status,
            outputs: Vec::new(),
            detail: None,
        }
    }

    pub fn with_output(mut self, output: RpcArg) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}
