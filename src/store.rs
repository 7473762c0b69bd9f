//! Execution store (§6.1, §6.2): the opaque collaborator the engine's host
//! calls into to transition deployed workflows and their executions through
//! the lifecycle the JSON/HTTP and binary-RPC transports expose. Kept
//! entirely in memory — persistence across process restarts is a Non-goal.
//!
//! Concurrent access follows the teacher's `datastore.rs`: a lock-free
//! concurrent map per resource collection rather than one big mutex.

use crate::value::{Value, WorkflowError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Active,
    Succeeded,
    Failed,
    Cancelled,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Active => "ACTIVE",
            ExecutionState::Succeeded => "SUCCEEDED",
            ExecutionState::Failed => "FAILED",
            ExecutionState::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowRecord {
    pub name: String,
    pub source_code: String,
    pub revision_id: String,
}

#[derive(Debug, Clone)]
pub struct Execution {
    pub name: String,
    pub workflow_name: String,
    pub workflow_revision_id: String,
    pub state: ExecutionState,
    pub argument: Value,
    /// JSON-encoded result of the outermost `return` (§4.6), set once
    /// `SUCCEEDED`.
    pub result: Option<serde_json::Value>,
    /// JSON-encoded structured error (§7), set once `FAILED`.
    pub error: Option<serde_json::Value>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

/// In-memory execution store. `projects/{p}/locations/{loc}/workflows/{id}`
/// and `.../executions/{id}` resource names (§6.2) are the map keys, as the
/// emulator is free to choose identifiers as long as they're unique within
/// their parent.
pub struct Store {
    workflows: DashMap<String, WorkflowRecord>,
    executions: DashMap<String, Execution>,
    revision_counters: DashMap<String, AtomicU64>,
    execution_counter: AtomicU64,
    /// Per-execution cooperative-cancellation flags (§5), registered by
    /// whoever actually drives the engine (`api::http`, `rpc::LocalRpc`) and
    /// consulted by [`Store::cancel_execution`] so a `cancel` on the
    /// resource name reaches the running engine, not just the stored state.
    cancel_flags: DashMap<String, Arc<AtomicBool>>,
}

impl Store {
    pub fn new() -> Arc<Store> {
        Arc::new(Store {
            workflows: DashMap::new(),
            executions: DashMap::new(),
            revision_counters: DashMap::new(),
            execution_counter: AtomicU64::new(0),
            cancel_flags: DashMap::new(),
        })
    }

    /// Register the cancellation flag an in-flight `engine::run` call was
    /// handed, so a later `cancel_execution` can actually signal it.
    pub fn register_cancel_flag(&self, execution_name: &str, flag: Arc<AtomicBool>) {
        self.cancel_flags.insert(execution_name.to_string(), flag);
    }

    /// Deploy (create or update) a workflow, bumping its revision id.
    pub fn deploy_workflow(&self, name: &str, source_code: String) -> WorkflowRecord {
        let counter = self
            .revision_counters
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0));
        let revision = counter.fetch_add(1, Ordering::SeqCst) + 1;
        let record = WorkflowRecord {
            name: name.to_string(),
            source_code,
            revision_id: format!("rev-{revision}"),
        };
        self.workflows.insert(name.to_string(), record.clone());
        record
    }

    /// `GetWorkflow(name) → {sourceCode, revisionId}` (§6.1): consulted by
    /// the engine's host when an execution references a workflow not
    /// previously parsed.
    pub fn get_workflow(&self, name: &str) -> Option<WorkflowRecord> {
        self.workflows.get(name).map(|r| r.clone())
    }

    pub fn delete_workflow(&self, name: &str) -> bool {
        self.workflows.remove(name).is_some()
    }

    pub fn list_workflows(&self) -> Vec<WorkflowRecord> {
        self.workflows.iter().map(|r| r.clone()).collect()
    }

    /// `CreateExecution(workflow-name, argument) → Execution{name, state=ACTIVE, startTime, workflowRevisionId}`.
    pub fn create_execution(
        &self,
        workflow_name: &str,
        argument: Value,
    ) -> Result<Execution, WorkflowError> {
        let record = self
            .get_workflow(workflow_name)
            .ok_or_else(|| WorkflowError::new(format!("workflow '{workflow_name}' not found")))?;
        let id = self.execution_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let name = format!("{workflow_name}/executions/exec-{id}");
        let execution = Execution {
            name: name.clone(),
            workflow_name: workflow_name.to_string(),
            workflow_revision_id: record.revision_id,
            state: ExecutionState::Active,
            argument,
            result: None,
            error: None,
            start_time: Utc::now(),
            end_time: None,
        };
        self.executions.insert(name.clone(), execution.clone());
        tracing::info!(execution = %name, workflow = workflow_name, "execution created");
        Ok(execution)
    }

    pub fn get_execution(&self, name: &str) -> Option<Execution> {
        self.executions.get(name).map(|e| e.clone())
    }

    /// `CompleteExecution(name, result)`: sets `SUCCEEDED`, stores the
    /// JSON-encoded result, stamps the end time.
    pub fn complete_execution(&self, name: &str, result: &Value) -> Result<(), WorkflowError> {
        let mut entry = self
            .executions
            .get_mut(name)
            .ok_or_else(|| WorkflowError::new(format!("execution '{name}' not found")))?;
        // A `cancel_execution` racing with the engine's own completion
        // already won (§5: cooperative cancellation); don't resurrect a
        // cancelled execution as succeeded.
        if entry.state == ExecutionState::Cancelled {
            return Ok(());
        }
        entry.state = ExecutionState::Succeeded;
        entry.result = Some(result.to_json());
        entry.end_time = Some(Utc::now());
        tracing::info!(execution = %name, "execution succeeded");
        self.cancel_flags.remove(name);
        Ok(())
    }

    /// `FailExecution(name, error)`: sets `FAILED`; the payload is the JSON
    /// of the structured error's `Value` form.
    pub fn fail_execution(&self, name: &str, error: &WorkflowError) -> Result<(), WorkflowError> {
        let mut entry = self
            .executions
            .get_mut(name)
            .ok_or_else(|| WorkflowError::new(format!("execution '{name}' not found")))?;
        if entry.state == ExecutionState::Cancelled {
            return Ok(());
        }
        entry.state = ExecutionState::Failed;
        entry.error = Some(error.to_value().to_json());
        entry.end_time = Some(Utc::now());
        tracing::info!(execution = %name, message = %error.message, "execution failed");
        self.cancel_flags.remove(name);
        Ok(())
    }

    /// `CancelExecution(name)`: sets `CANCELLED`; errors if the execution is
    /// not `ACTIVE`.
    pub fn cancel_execution(&self, name: &str) -> Result<(), WorkflowError> {
        let mut entry = self
            .executions
            .get_mut(name)
            .ok_or_else(|| WorkflowError::new(format!("execution '{name}' not found")))?;
        if entry.state != ExecutionState::Active {
            return Err(WorkflowError::new(format!(
                "execution '{name}' is not ACTIVE (state: {})",
                entry.state.as_str()
            )));
        }
        entry.state = ExecutionState::Cancelled;
        entry.end_time = Some(Utc::now());
        tracing::info!(execution = %name, "execution cancelled");
        if let Some(flag) = self.cancel_flags.get(name) {
            flag.store(true, Ordering::Relaxed);
        }
        self.cancel_flags.remove(name);
        Ok(())
    }
}

impl Default for Store {
    fn default() -> Self {
        // `Store::new` returns `Arc<Store>`; this impl exists only so
        // `Store` satisfies trait bounds expecting `Default`, not for
        // direct construction.
        Store {
            workflows: DashMap::new(),
            executions: DashMap::new(),
            revision_counters: DashMap::new(),
            execution_counter: AtomicU64::new(0),
            cancel_flags: DashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deploy_bumps_revision_on_redeploy() {
        let store = Store::new();
        let r1 = store.deploy_workflow("wf-a", "main:\n  steps: []".to_string());
        let r2 = store.deploy_workflow("wf-a", "main:\n  steps: []".to_string());
        assert_ne!(r1.revision_id, r2.revision_id);
    }

    #[test]
    fn create_execution_fails_for_unknown_workflow() {
        let store = Store::new();
        assert!(store.create_execution("missing", Value::Null).is_err());
    }

    #[test]
    fn full_execution_lifecycle() {
        let store = Store::new();
        store.deploy_workflow("wf-a", "main:\n  steps: []".to_string());
        let exec = store.create_execution("wf-a", Value::Null).unwrap();
        assert_eq!(exec.state, ExecutionState::Active);
        store.complete_execution(&exec.name, &Value::Int(42)).unwrap();
        let fetched = store.get_execution(&exec.name).unwrap();
        assert_eq!(fetched.state, ExecutionState::Succeeded);
        assert_eq!(fetched.result, Some(serde_json::json!(42)));
    }

    #[test]
    fn cancel_requires_active_state() {
        let store = Store::new();
        store.deploy_workflow("wf-a", "main:\n  steps: []".to_string());
        let exec = store.create_execution("wf-a", Value::Null).unwrap();
        store.complete_execution(&exec.name, &Value::Null).unwrap();
        assert!(store.cancel_execution(&exec.name).is_err());
    }
}
