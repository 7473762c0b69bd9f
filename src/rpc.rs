//! Binary-RPC transport surface (§11).
//!
//! Production workflow services expose executions over a generated gRPC
//! stub; fabricating `.proto` files and `tonic`-generated code here would be
//! inventing a wire format rather than grounding one, so this module
//! captures the same request/response shapes as [`crate::api::http`] behind
//! a plain trait instead — the shape a real binary transport would sit
//! behind once protobuf codegen is wired up. Mirrors the teacher's
//! `provider::Provider` trait: one trait, `Send + Sync`, implementations
//! swapped in by the caller.

use crate::error::EngineError;
use crate::store::{Execution, WorkflowRecord};
use crate::value::Value;

pub trait WorkflowsRpc: Send + Sync {
    fn create_workflow(&self, name: &str, source_code: String) -> Result<WorkflowRecord, EngineError>;

    fn get_workflow(&self, name: &str) -> Result<WorkflowRecord, EngineError>;

    fn delete_workflow(&self, name: &str) -> Result<(), EngineError>;

    fn list_workflows(&self) -> Result<Vec<WorkflowRecord>, EngineError>;

    fn create_execution(&self, workflow_name: &str, argument: Value) -> Result<Execution, EngineError>;

    fn get_execution(&self, name: &str) -> Result<Execution, EngineError>;

    fn cancel_execution(&self, name: &str) -> Result<(), EngineError>;
}

/// Implementation backed by the in-memory [`crate::store::Store`], run
/// synchronously to completion on the calling thread — the same execution
/// model [`crate::api::http`] uses, just without the JSON envelope.
pub struct LocalRpc {
    pub store: std::sync::Arc<crate::store::Store>,
    pub registry: std::sync::Arc<crate::stdlib::Registry>,
}

impl WorkflowsRpc for LocalRpc {
    fn create_workflow(&self, name: &str, source_code: String) -> Result<WorkflowRecord, EngineError> {
        crate::workflow::parser::parse_source(source_code.as_bytes())?;
        Ok(self.store.deploy_workflow(name, source_code))
    }

    fn get_workflow(&self, name: &str) -> Result<WorkflowRecord, EngineError> {
        self.store
            .get_workflow(name)
            .ok_or_else(|| EngineError::WorkflowNotFound(name.to_string()))
    }

    fn delete_workflow(&self, name: &str) -> Result<(), EngineError> {
        if self.store.delete_workflow(name) {
            Ok(())
        } else {
            Err(EngineError::WorkflowNotFound(name.to_string()))
        }
    }

    fn list_workflows(&self) -> Result<Vec<WorkflowRecord>, EngineError> {
        Ok(self.store.list_workflows())
    }

    fn create_execution(&self, workflow_name: &str, argument: Value) -> Result<Execution, EngineError> {
        let record = self
            .store
            .get_workflow(workflow_name)
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_name.to_string()))?;
        let execution = self
            .store
            .create_execution(workflow_name, argument.clone())
            .map_err(EngineError::Workflow)?;

        let workflow = crate::workflow::parser::parse_source(record.source_code.as_bytes())?;
        let cancelled = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        self.store.register_cancel_flag(&execution.name, cancelled.clone());
        let result = crate::engine::run(&workflow, &self.registry, argument, cancelled);
        match result {
            Ok(value) => {
                self.store
                    .complete_execution(&execution.name, &value)
                    .map_err(EngineError::Workflow)?;
            }
            Err(err) => {
                self.store
                    .fail_execution(&execution.name, &err)
                    .map_err(EngineError::Workflow)?;
            }
        }
        self.store
            .get_execution(&execution.name)
            .ok_or_else(|| EngineError::ExecutionNotFound(execution.name.clone()))
    }

    fn get_execution(&self, name: &str) -> Result<Execution, EngineError> {
        self.store
            .get_execution(name)
            .ok_or_else(|| EngineError::ExecutionNotFound(name.to_string()))
    }

    fn cancel_execution(&self, name: &str) -> Result<(), EngineError> {
        self.store.cancel_execution(name).map_err(EngineError::Workflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stdlib::Registry;
    use crate::store::Store;

    fn rpc() -> LocalRpc {
        LocalRpc {
            store: Store::new(),
            registry: std::sync::Arc::new(Registry::with_builtins()),
        }
    }

    #[test]
    fn deploy_then_run_via_trait_object() {
        let rpc = rpc();
        let r: &dyn WorkflowsRpc = &rpc;
        r.create_workflow("wf-a", "main:\n  steps:\n    - done:\n        return: 42\n".to_string())
            .unwrap();
        let exec = r.create_execution("wf-a", Value::Null).unwrap();
        assert_eq!(exec.result, Some(serde_json::json!(42)));
    }

    #[test]
    fn unknown_workflow_reports_not_found() {
        let rpc = rpc();
        assert!(matches!(
            rpc.get_workflow("missing"),
            Err(EngineError::WorkflowNotFound(_))
        ));
    }
}
