//! CONTROLLER service arguments
//!
//! `(operation, [name, [driver_type | command_op, object_json]])`

use crate::registry::DriverType;
use crate::rpc::RpcArg;
use crate::session::{SessionError, SessionResult};
use crate::transaction::{CommandEntry, CommandOp, ConfigObject};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerCommand {
    Add { name: String, driver_type: DriverType },
    Update { name: String, driver_type: DriverType },
    Delete { name: String },
    List,
    Status { name: String },
    Enqueue { name: String, entry: CommandEntry },
}

impl ControllerCommand {
    pub fn parse(args: &[RpcArg]) -> SessionResult<Self> {
        let code = args
            .first()
            .and_then(RpcArg::as_u8)
            .ok_or_else(|| invalid("operation must be a u8"))?;

        let command = match code {
            0 | 1 => {
                expect_len(args, 3)?;
                let name = string_arg(args, 1, "name")?;
                let driver_type: DriverType = string_arg(args, 2, "driver_type")?
                    .parse()
                    .map_err(SessionError::InvalidInput)?;
                if code == 0 {
                    ControllerCommand::Add { name, driver_type }
                } else {
                    ControllerCommand::Update { name, driver_type }
                }
            }
            2 => {
                expect_len(args, 2)?;
                ControllerCommand::Delete {
                    name: string_arg(args, 1, "name")?,
                }
            }
            3 => {
                expect_len(args, 1)?;
                ControllerCommand::List
            }
            4 => {
                expect_len(args, 2)?;
                ControllerCommand::Status {
                    name: string_arg(args, 1, "name")?,
                }
            }
            5 => {
                expect_len(args, 4)?;
                let name = string_arg(args, 1, "name")?;
                let op = match args[2].as_u8() {
                    Some(0) => CommandOp::Create,
                    Some(1) => CommandOp::Update,
                    Some(2) => CommandOp::Delete,
                    _ => return Err(invalid("command op must be 0, 1 or 2")),
                };
                let object: ConfigObject = serde_json::from_str(&string_arg(args, 3, "object")?)
                    .map_err(|e| invalid(format!("invalid object: {}", e)))?;
                ControllerCommand::Enqueue {
                    name,
                    entry: CommandEntry::new(op, object),
                }
            }
            other => return Err(invalid(format!("unknown controller operation {}", other))),
        };

        if let Some(name) = command.name() {
            if name.trim().is_empty() {
                return Err(invalid("controller name must not be empty"));
            }
        }
        Ok(command)
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            ControllerCommand::Add { name, .. }
            | ControllerCommand::Update { name, .. }
            | ControllerCommand::Delete { name }
            | ControllerCommand::Status { name }
            | ControllerCommand::Enqueue { name, .. } => Some(name),
            ControllerCommand::List => None,
        }
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

fn string_arg(args: &[RpcArg], index: usize, name: &str) -> SessionResult<String> {
    args.get(index)
        .and_then(RpcArg::as_str)
        .map(str::to_string)
        .ok_or_else(|| invalid(format!("{} must be a string", name)))
}
