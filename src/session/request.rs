//! CONFIG service argument validation
//!
//! Positional layout: `(session_id, operation, [config_id | timeout | mode, [vtn_name]])`.
//! Every mismatch fails `INVALID_INPUT` before any lock is touched.

use std::sync::OnceLock;

use regex::Regex;

use super::errors::{SessionError, SessionResult};
use crate::lock::ConfigMode;
use crate::rpc::RpcArg;

/// Operation codes carried in the second CONFIG argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOperation {
    Acquire,
    Release,
    AcquireForce,
    AcquireTimed,
    AcquirePartial,
}

impl ConfigOperation {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(ConfigOperation::Acquire),
            1 => Some(ConfigOperation::Release),
            2 => Some(ConfigOperation::AcquireForce),
            3 => Some(ConfigOperation::AcquireTimed),
            4 => Some(ConfigOperation::AcquirePartial),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            ConfigOperation::Acquire => 0,
            ConfigOperation::Release => 1,
            ConfigOperation::AcquireForce => 2,
            ConfigOperation::AcquireTimed => 3,
            ConfigOperation::AcquirePartial => 4,
        }
    }
}

/// A validated CONFIG request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigRequest {
    Acquire {
        session_id: u32,
    },
    AcquireForce {
        session_id: u32,
    },
    /// 0 = fail immediately, > 0 = bounded wait, < 0 = unbounded wait
    AcquireTimed {
        session_id: u32,
        timeout_ms: i32,
    },
    AcquirePartial {
        session_id: u32,
        mode: ConfigMode,
        vtn_name: Option<String>,
    },
    Release {
        session_id: u32,
        config_id: u32,
    },
}

impl ConfigRequest {
    /// Timed acquisitions with a non-zero timeout may park in the queue
    pub fn may_wait(&self) -> bool {
        matches!(self, ConfigRequest::AcquireTimed { timeout_ms, .. } if *timeout_ms != 0)
    }

    pub fn parse(args: &[RpcArg]) -> SessionResult<Self> {
        let session_id = arg(args, 0, "session_id", RpcArg::as_u32)?;
        let code = arg(args, 1, "operation", RpcArg::as_u8)?;
        let operation = ConfigOperation::from_wire(code)
            .ok_or_else(|| invalid(format!("unknown operation {}", code)))?;

        match operation {
            ConfigOperation::Acquire => {
                expect_len(args, 2)?;
                Ok(ConfigRequest::Acquire { session_id })
            }
            ConfigOperation::AcquireForce => {
                expect_len(args, 2)?;
                Ok(ConfigRequest::AcquireForce { session_id })
            }
            ConfigOperation::Release => {
                expect_len(args, 3)?;
                let config_id = arg(args, 2, "config_id", RpcArg::as_u32)?;
                Ok(ConfigRequest::Release {
                    session_id,
                    config_id,
                })
            }
            ConfigOperation::AcquireTimed => {
                expect_len(args, 3)?;
                let timeout_ms = arg(args, 2, "timeout", RpcArg::as_i32)?;
                Ok(ConfigRequest::AcquireTimed {
                    session_id,
                    timeout_ms,
                })
            }
            ConfigOperation::AcquirePartial => {
                let wire_mode = arg(args, 2, "mode", RpcArg::as_u8)?;
                let mode = ConfigMode::from_wire(wire_mode)
                    .ok_or_else(|| invalid(format!("unknown mode {}", wire_mode)))?;
                match mode {
                    ConfigMode::Global => Err(invalid("partial acquisition cannot take GLOBAL mode")),
                    ConfigMode::Real | ConfigMode::Virtual => {
                        expect_len(args, 3)?;
                        Ok(ConfigRequest::AcquirePartial {
                            session_id,
                            mode,
                            vtn_name: None,
                        })
                    }
                    ConfigMode::Vtn => {
                        expect_len(args, 4)?;
                        let name = args[3]
                            .as_str()
                            .ok_or_else(|| invalid("vtn_name must be a string"))?;
                        validate_vtn_name(name)?;
                        Ok(ConfigRequest::AcquirePartial {
                            session_id,
                            mode,
                            vtn_name: Some(name.to_string()),
                        })
                    }
                }
            }
        }
    }

    pub fn session_id(&self) -> u32 {
        match self {
            ConfigRequest::Acquire { session_id }
            | ConfigRequest::AcquireForce { session_id }
            | ConfigRequest::AcquireTimed { session_id, .. }
            | ConfigRequest::AcquirePartial { session_id, .. }
            | ConfigRequest::Release { session_id, .. } => *session_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConfigRequest::Acquire { .. } => "ACQUIRE",
            ConfigRequest::AcquireForce { .. } => "ACQUIRE_FORCE",
            ConfigRequest::AcquireTimed { .. } => "ACQUIRE_TIMED",
            ConfigRequest::AcquirePartial { .. } => "ACQUIRE_PARTIAL",
            ConfigRequest::Release { .. } => "RELEASE",
        }
    }

    /// Scope requested by an acquisition; GLOBAL unless partial
    pub fn mode(&self) -> (ConfigMode, Option<&str>) {
        match self {
            ConfigRequest::AcquirePartial { mode, vtn_name, .. } => (*mode, vtn_name.as_deref()),
            _ => (ConfigMode::Global, None),
        }
    }
}

/// `(session_id, config_id)` as carried by CANDIDATE and ABORT_CANDIDATE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateRequest {
    pub session_id: u32,
    pub config_id: u32,
}

impl CandidateRequest {
    pub fn parse(args: &[RpcArg]) -> SessionResult<Self> {
        expect_len(args, 2)?;
        Ok(Self {
            session_id: arg(args, 0, "session_id", RpcArg::as_u32)?,
            config_id: arg(args, 1, "config_id", RpcArg::as_u32)?,
        })
    }
}

/// 1-31 characters, ASCII alphanumeric or `_`, starting alphanumeric
pub fn validate_vtn_name(name: &str) -> SessionResult<()> {
    static VTN_NAME: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = VTN_NAME.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_]{0,30}$").ok());
    match pattern {
        Some(re) if re.is_match(name) => Ok(()),
        Some(_) => Err(invalid(format!("invalid vtn name '{}'", name))),
        None => Err(SessionError::Internal("vtn name pattern failed to compile".into())),
    }
}

fn invalid(message: impl Into<String>) -> SessionError {
    SessionError::InvalidInput(message.into())
}

fn expect_len(args: &[RpcArg], expected: usize) -> SessionResult<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(invalid(format!(
            "expected {} arguments, got {}",
            expected,
            args.len()
        )))
    }
}

fn arg<T>(
    args: &[RpcArg],
    index: usize,
    name: &str,
    extract: impl Fn(&RpcArg) -> Option<T>,
) -> SessionResult<T> {
    let value = args
        .get(index)
        .ok_or_else(|| invalid(format!("missing argument {}", name)))?;
    extract(value).ok_or_else(|| {
        invalid(format!(
            "argument {} has wrong type {}",
            name,
            value.type_name()
        ))
    })
}
