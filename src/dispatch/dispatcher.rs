//! Service dispatcher
//!
//! Routes one typed RPC request to the component that owns the service and
//! folds the result into a response. Every response carries a fresh request
//! id for log correlation.

use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use super::admin::ControllerCommand;
use super::lease::WriteLease;
use crate::context::{CoordinatorContext, INTERNAL_SESSION_ID};
use crate::lock::{LockError, WriteType};
use crate::rpc::{RpcArg, RpcRequest, RpcResponse, ServiceId};
use crate::session::{CandidateRequest, ConfigRequest, SessionError, SessionResult};
use crate::status::StatusCode;
use crate::transaction::{AuditType, CommitOutcome, CommitScope};

/// Handler result before it is stamped with a request id
#[derive(Debug, Clone, PartialEq)]
struct Reply {
    status: StatusCode,
    outputs: Vec<RpcArg>,
    detail: Option<Value>,
}

impl Reply {
    fn success() -> Self {
        Self {
            status: StatusCode::Success,
            outputs: Vec::new(),
            detail: None,
        }
    }

    fn output(mut self, output: RpcArg) -> Self {
        self.outputs.push(output);
        self
    }

    fn detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    fn from_outcome(outcome: &CommitOutcome) -> Self {
        Self {
            status: outcome.status,
            outputs: Vec::new(),
            detail: serde_json::to_value(outcome).ok(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceDispatcher {
    context: Arc<CoordinatorContext>,
}

impl ServiceDispatcher {
    pub fn new(context: Arc<CoordinatorContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Arc<CoordinatorContext> {
        &self.context
    }

    /// Whether answering `request` can park the caller in the acquisition
    /// queue. Malformed requests never block.
    pub fn may_block(request: &RpcRequest) -> bool {
        request.service == ServiceId::Config
            && ConfigRequest::parse(&request.args)
                .map(|r| r.may_wait())
                .unwrap_or(false)
    }

    pub fn dispatch(&self, request: &RpcRequest) -> RpcResponse {
        let request_id = request
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let args = request.args.as_slice();

        let result = match request.service {
            ServiceId::Config => self.handle_config(args),
            ServiceId::Candidate => self.handle_candidate_commit(args),
            ServiceId::AbortCandidate => self.handle_abort_candidate(args),
            ServiceId::Audit => self.handle_audit(args),
            ServiceId::Controller => self.handle_controller(args),
            ServiceId::Read | ServiceId::ReadStatus | ServiceId::StartupDb | ServiceId::AutoSave => {
                Ok(Reply {
                    status: StatusCode::ServiceNotSupported,
                    outputs: Vec::new(),
                    detail: None,
                })
            }
        };

        match result {
            Ok(reply) => RpcResponse {
                request_id,
                status: reply.status,
                outputs: reply.outputs,
                detail: reply.detail,
            },
            Err(e) => RpcResponse::new(request_id, e.status())
                .with_detail(json!({ "error": e.to_string() })),
        }
    }

    // =========================================================================
    // SERVICES
    // =========================================================================

    fn handle_config(&self, args: &[RpcArg]) -> SessionResult<Reply> {
        let config_id = self.context.sessions().handle_config(args)?;
        let reply = Reply::success();
        Ok(match config_id {
            Some(id) => reply.output(RpcArg::U32(id)),
            None => reply,
        })
    }

    /// Commit the session's candidate to every registered controller
    fn handle_candidate_commit(&self, args: &[RpcArg]) -> SessionResult<Reply> {
        let request = CandidateRequest::parse(args)?;
        let lock = self.context.config_lock();

        let data = lock.get_config_data(request.session_id)?;
        if data.config_id != request.config_id {
            return Err(LockError::InvalidConfigId {
                session_id: request.session_id,
                config_id: request.config_id,
            }
            .into());
        }

        let _lease = WriteLease::acquire(lock, request.session_id, WriteType::Commit)?;
        let controllers = self.context.registry().names()?;
        let scope = CommitScope {
            operation: WriteType::Commit,
            mode: data.mode,
            vtn_name: data.vtn_name,
        };
        let outcome = self
            .context
            .transactions()
            .commit(request.config_id, controllers, &scope);
        Ok(Reply::from_outcome(&outcome))
    }

    fn handle_abort_candidate(&self, args: &[RpcArg]) -> SessionResult<Reply> {
        self.context.sessions().abort_candidate(args)?;
        Ok(Reply::success())
    }

    /// `(session_id, controller, audit_type)`
    fn handle_audit(&self, args: &[RpcArg]) -> SessionResult<Reply> {
        if args.len() != 3 {
            return Err(SessionError::InvalidInput(format!(
                "expected 3 arguments, got {}",
                args.len()
            )));
        }
        let session_id = args[0]
            .as_u32()
            .ok_or_else(|| SessionError::InvalidInput("session_id must be a u32".into()))?;
        let controller = args[1]
            .as_str()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| SessionError::InvalidInput("controller must be a string".into()))?;
        let audit_type = args[2]
            .as_u8()
            .and_then(AuditType::from_wire)
            .ok_or_else(|| SessionError::InvalidInput("unknown audit type".into()))?;

        let outcome = self.audit(session_id, controller, audit_type)?;
        Ok(Reply::from_outcome(&outcome))
    }

    fn handle_controller(&self, args: &[RpcArg]) -> SessionResult<Reply> {
        let context = &self.context;
        let reply = Reply::success();

        Ok(match ControllerCommand::parse(args)? {
            ControllerCommand::Add { name, driver_type } => {
                context.add_controller(&name, driver_type)?;
                reply
            }
            ControllerCommand::Update { name, driver_type } => {
                context.update_controller(&name, driver_type)?;
                reply
            }
            ControllerCommand::Delete { name } => {
                context.delete_controller(&name)?;
                reply
            }
            ControllerCommand::List => {
                let controllers = context.list_controllers()?;
                let count = u32::try_from(controllers.len()).unwrap_or(u32::MAX);
                reply
                    .output(RpcArg::U32(count))
                    .detail(json!({ "controllers": controllers }))
            }
            ControllerCommand::Status { name } => {
                let info = context.controller_status(&name)?;
                reply.detail(json!({ "controller": info }))
            }
            ControllerCommand::Enqueue { name, entry } => {
                context.enqueue_command(&name, entry)?;
                let pending = context.command_cache().len(&name)?;
                reply.output(RpcArg::U32(u32::try_from(pending).unwrap_or(u32::MAX)))
            }
        })
    }

    // =========================================================================
    // AUDIT
    // =========================================================================

    /// Audit one controller under the matching system-wide write session
    pub fn audit(
        &self,
        session_id: u32,
        controller: &str,
        audit_type: AuditType,
    ) -> SessionResult<CommitOutcome> {
        let write_type = match audit_type {
            AuditType::User => WriteType::AuditUser,
            AuditType::Driver => WriteType::AuditDriver,
        };
        let _lease = WriteLease::acquire(self.context.config_lock(), session_id, write_type)?;
        Ok(self
            .context
            .transactions()
            .run_audit(controller, audit_type)?)
    }

    /// Audit triggered by a controller reconnecting
    pub fn run_driver_audit(&self, controller: &str) -> SessionResult<CommitOutcome> {
        self.audit(INTERNAL_SESSION_ID, controller, AuditType::Driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextSettings;
    use crate::persistence::MemoryStore;
    use crate::registry::{AccessMode, ConnectionStatus, DriverType};
    use crate::transaction::LoopbackDriver;

    fn dispatcher() -> (ServiceDispatcher, Arc<LoopbackDriver>) {
        let context = Arc::new(CoordinatorContext::new(
            Arc::new(MemoryStore::new()),
            ContextSettings::default(),
        ));
        context.start().unwrap();
        let pfc = Arc::new(LoopbackDriver::new(DriverType::Pfc, true));
        context.drivers().register_loopback(pfc.clone()).unwrap();
        (ServiceDispatcher::new(context), pfc)
    }

    fn call(dispatcher: &ServiceDispatcher, service: ServiceId, args: Vec<RpcArg>) -> RpcResponse {
        dispatcher.dispatch(&RpcRequest::new(service, args))
    }

    fn s(value: &str) -> RpcArg {
        RpcArg::Str(value.into())
    }

    #[test]
    fn test_config_returns_config_id() {
        let (d, _) = dispatcher();
        let response = call(&d, ServiceId::Config, vec![RpcArg::U32(10), RpcArg::U8(0)]);
        assert_eq!(response.status, StatusCode::Success);
        assert_eq!(response.outputs, vec![RpcArg::U32(1)]);
        assert!(Uuid::parse_str(&response.request_id).is_ok());

        let busy = call(&d, ServiceId::Config, vec![RpcArg::U32(12), RpcArg::U8(0)]);
        assert_eq!(busy.status, StatusCode::Busy);
        assert!(busy.detail.is_some());
    }

    #[test]
    fn test_client_id_echoed() {
        let (d, _) = dispatcher();
        let request = RpcRequest::new(ServiceId::Read, vec![]).with_id("c-1");
        assert_eq!(d.dispatch(&request).request_id, "c-1");
    }

    #[test]
    fn test_only_waiting_acquisitions_may_block() {
        let timed = |timeout| {
            RpcRequest::new(
                ServiceId::Config,
                vec![RpcArg::U32(10), RpcArg::U8(3), RpcArg::I32(timeout)],
            )
        };
        assert!(ServiceDispatcher::may_block(&timed(-1)));
        assert!(ServiceDispatcher::may_block(&timed(50)));
        assert!(!ServiceDispatcher::may_block(&timed(0)));
        assert!(!ServiceDispatcher::may_block(&RpcRequest::new(
            ServiceId::Config,
            vec![RpcArg::U32(10), RpcArg::U8(0)]
        )));
        assert!(!ServiceDispatcher::may_block(&RpcRequest::new(
            ServiceId::Candidate,
            vec![RpcArg::U32(10), RpcArg::U8(3), RpcArg::I32(-1)]
        )));
    }

    #[test]
    fn test_unsupported_services() {
        let (d, _) = dispatcher();
        for service in [
            ServiceId::Read,
            ServiceId::ReadStatus,
            ServiceId::StartupDb,
            ServiceId::AutoSave,
        ] {
            assert_eq!(
                call(&d, service, vec![]).status,
                StatusCode::ServiceNotSupported
            );
        }
    }

    #[test]
    fn test_commit_after_audit() {
        let (d, _) = dispatcher();
        call(&d, ServiceId::Controller, vec![RpcArg::U8(0), s("c1"), s("pfc")]);
        d.context()
            .registry()
            .acquire("c1", AccessMode::Write)
            .unwrap()
            .set_connection_status(ConnectionStatus::Up)
            .unwrap();

        let acquired = call(&d, ServiceId::Config, vec![RpcArg::U32(10), RpcArg::U8(0)]);
        let config_id = acquired.outputs[0].as_u32().unwrap();

        // Unaudited: skipped as disconnected, nothing to fail
        let response = call(
            &d,
            ServiceId::Candidate,
            vec![RpcArg::U32(10), RpcArg::U32(config_id)],
        );
        let detail = response.detail.unwrap();
        assert_eq!(detail["vote_results"][0]["response_code"], "CTR_DISCONNECTED");

        let audit = call(&d, ServiceId::Audit, vec![RpcArg::U32(10), s("c1"), RpcArg::U8(0)]);
        assert_eq!(audit.status, StatusCode::Success);

        let response = call(
            &d,
            ServiceId::Candidate,
            vec![RpcArg::U32(10), RpcArg::U32(config_id)],
        );
        assert_eq!(response.status, StatusCode::Success);
        assert_eq!(response.detail.unwrap()["commit_results"][0]["controller"], "c1");
    }

    #[test]
    fn test_commit_rejects_wrong_config_id() {
        let (d, _) = dispatcher();
        call(&d, ServiceId::Config, vec![RpcArg::U32(10), RpcArg::U8(0)]);
        let response = call(&d, ServiceId::Candidate, vec![RpcArg::U32(10), RpcArg::U32(99)]);
        assert_eq!(response.status, StatusCode::InvalidConfigId);

        let response = call(&d, ServiceId::Candidate, vec![RpcArg::U32(11), RpcArg::U32(1)]);
        assert_eq!(response.status, StatusCode::InvalidSessionId);
    }

    #[test]
    fn test_audit_argument_validation() {
        let (d, _) = dispatcher();
        for args in [
            vec![RpcArg::U32(1), s("c1")],
            vec![RpcArg::U32(1), s(""), RpcArg::U8(0)],
            vec![RpcArg::U32(1), s("c1"), RpcArg::U8(4)],
        ] {
            assert_eq!(call(&d, ServiceId::Audit, args).status, StatusCode::InvalidInput);
        }
        let unknown = call(&d, ServiceId::Audit, vec![RpcArg::U32(1), s("ghost"), RpcArg::U8(0)]);
        assert_eq!(unknown.status, StatusCode::CtrDisconnected);
    }

    #[test]
    fn test_controller_list_and_status() {
        let (d, _) = dispatcher();
        call(&d, ServiceId::Controller, vec![RpcArg::U8(0), s("c1"), s("pfc")]);
        call(&d, ServiceId::Controller, vec![RpcArg::U8(0), s("c2"), s("vnp")]);

        let list = call(&d, ServiceId::Controller, vec![RpcArg::U8(3)]);
        assert_eq!(list.outputs, vec![RpcArg::U32(2)]);
        assert_eq!(list.detail.unwrap()["controllers"][1]["name"], "c2");

        let status = call(&d, ServiceId::Controller, vec![RpcArg::U8(4), s("c1")]);
        assert_eq!(status.detail.unwrap()["controller"]["audit_result"], false);

        let deleted = call(&d, ServiceId::Controller, vec![RpcArg::U8(2), s("c2")]);
        assert_eq!(deleted.status, StatusCode::Success);
        let missing = call(&d, ServiceId::Controller, vec![RpcArg::U8(4), s("c2")]);
        assert_eq!(missing.status, StatusCode::CtrDisconnected);
    }
}
