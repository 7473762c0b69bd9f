//! axum-based JSON/HTTP surface over the in-memory [`crate::store::Store`].
//!
//! Resource paths follow §6.2: `/v1/projects/{p}/locations/{l}/workflows/{id}`
//! and `.../executions/{id}`. Execution bodies run on a blocking task since
//! the engine itself is synchronous (thread-per-`parallel`-branch, blocking
//! `reqwest` calls for `http.*`) — the same split the teacher's `main.rs`
//! makes between an async CLI shell and file IO.

use crate::engine;
use crate::stdlib::Registry;
use crate::store::Store;
use crate::value::Value;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
struct AppState {
    store: Arc<Store>,
    registry: Arc<Registry>,
}

pub async fn serve(addr: &str, store: Arc<Store>) -> Result<(), std::io::Error> {
    let state = AppState {
        store,
        registry: Arc::new(Registry::with_builtins()),
    };
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/projects/:project/locations/:location/workflows",
            get(list_workflows),
        )
        .route(
            "/v1/projects/:project/locations/:location/workflows/:id",
            put(deploy_workflow).get(get_workflow).delete(delete_workflow),
        )
        .route(
            "/v1/projects/:project/locations/:location/workflows/:id/executions",
            post(create_execution),
        )
        .route(
            "/v1/projects/:project/locations/:location/workflows/:wf_id/executions/:exec_id",
            get(get_execution),
        )
        .route(
            "/v1/projects/:project/locations/:location/workflows/:wf_id/executions/:exec_id/cancel",
            post(cancel_execution),
        )
        .route("/v1/callbacks/:callback_id", post(deliver_callback))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

fn workflow_name(project: &str, location: &str, id: &str) -> String {
    format!("projects/{project}/locations/{location}/workflows/{id}")
}

#[derive(Debug)]
struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({"error": self.1}))).into_response()
    }
}

impl From<crate::error::EngineError> for ApiError {
    fn from(e: crate::error::EngineError) -> Self {
        use crate::error::EngineError::*;
        let status = match &e {
            WorkflowNotFound(_) | ExecutionNotFound(_) => StatusCode::NOT_FOUND,
            ExecutionNotActive(_) | Parse(_) | Expr(_) => StatusCode::BAD_REQUEST,
            Workflow(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, e.to_string())
    }
}

#[derive(Deserialize)]
struct DeployBody {
    #[serde(rename = "sourceCode")]
    source_code: String,
}

#[derive(Serialize)]
struct WorkflowResponse {
    name: String,
    #[serde(rename = "revisionId")]
    revision_id: String,
}

async fn deploy_workflow(
    State(state): State<AppState>,
    Path((project, location, id)): Path<(String, String, String)>,
    Json(body): Json<DeployBody>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    crate::workflow::parser::parse_source(body.source_code.as_bytes())
        .map_err(crate::error::EngineError::Parse)?;
    let name = workflow_name(&project, &location, &id);
    let record = state.store.deploy_workflow(&name, body.source_code);
    Ok(Json(WorkflowResponse {
        name: record.name,
        revision_id: record.revision_id,
    }))
}

async fn get_workflow(
    State(state): State<AppState>,
    Path((project, location, id)): Path<(String, String, String)>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    let name = workflow_name(&project, &location, &id);
    let record = state
        .store
        .get_workflow(&name)
        .ok_or_else(|| crate::error::EngineError::WorkflowNotFound(name.clone()))?;
    Ok(Json(WorkflowResponse {
        name: record.name,
        revision_id: record.revision_id,
    }))
}

async fn delete_workflow(
    State(state): State<AppState>,
    Path((project, location, id)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    let name = workflow_name(&project, &location, &id);
    if state.store.delete_workflow(&name) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(crate::error::EngineError::WorkflowNotFound(name).into())
    }
}

#[derive(Serialize)]
struct WorkflowListResponse {
    workflows: Vec<WorkflowResponse>,
}

async fn list_workflows(
    State(state): State<AppState>,
    Path((_project, _location)): Path<(String, String)>,
) -> Json<WorkflowListResponse> {
    Json(WorkflowListResponse {
        workflows: state
            .store
            .list_workflows()
            .into_iter()
            .map(|r| WorkflowResponse {
                name: r.name,
                revision_id: r.revision_id,
            })
            .collect(),
    })
}

#[derive(Deserialize, Default)]
struct CreateExecutionBody {
    argument: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct ExecutionResponse {
    name: String,
    state: String,
    argument: serde_json::Value,
    result: Option<serde_json::Value>,
    error: Option<serde_json::Value>,
}

impl From<crate::store::Execution> for ExecutionResponse {
    fn from(e: crate::store::Execution) -> Self {
        ExecutionResponse {
            name: e.name,
            state: e.state.as_str().to_string(),
            argument: e.argument.to_json(),
            result: e.result,
            error: e.error,
        }
    }
}

async fn create_execution(
    State(state): State<AppState>,
    Path((project, location, id)): Path<(String, String, String)>,
    body: Option<Json<CreateExecutionBody>>,
) -> Result<Json<ExecutionResponse>, ApiError> {
    let wf_name = workflow_name(&project, &location, &id);
    let record = state
        .store
        .get_workflow(&wf_name)
        .ok_or_else(|| crate::error::EngineError::WorkflowNotFound(wf_name.clone()))?;

    let argument = body
        .and_then(|Json(b)| b.argument)
        .map(|j| Value::from_json(&j))
        .unwrap_or(Value::Null);

    let execution = state
        .store
        .create_execution(&wf_name, argument.clone())
        .map_err(crate::error::EngineError::Workflow)?;

    let registry = state.registry.clone();
    let store = state.store.clone();
    let exec_name = execution.name.clone();
    tokio::task::spawn_blocking(move || {
        let workflow = match crate::workflow::parser::parse_source(record.source_code.as_bytes()) {
            Ok(wf) => wf,
            Err(e) => {
                let _ = store.fail_execution(
                    &exec_name,
                    &crate::value::WorkflowError::new(e.to_string()),
                );
                return;
            }
        };
        let cancelled = Arc::new(AtomicBool::new(false));
        store.register_cancel_flag(&exec_name, cancelled.clone());
        match engine::run(&workflow, &registry, argument, cancelled) {
            Ok(value) => {
                let _ = store.complete_execution(&exec_name, &value);
            }
            Err(err) => {
                let _ = store.fail_execution(&exec_name, &err);
            }
        }
    });

    Ok(Json(execution.into()))
}

async fn get_execution(
    State(state): State<AppState>,
    Path((project, location, wf_id, exec_id)): Path<(String, String, String, String)>,
) -> Result<Json<ExecutionResponse>, ApiError> {
    let name = format!(
        "{}/executions/{exec_id}",
        workflow_name(&project, &location, &wf_id)
    );
    let execution = state
        .store
        .get_execution(&name)
        .ok_or_else(|| crate::error::EngineError::ExecutionNotFound(name.clone()))?;
    Ok(Json(execution.into()))
}

async fn cancel_execution(
    State(state): State<AppState>,
    Path((project, location, wf_id, exec_id)): Path<(String, String, String, String)>,
) -> Result<StatusCode, ApiError> {
    let name = format!(
        "{}/executions/{exec_id}",
        workflow_name(&project, &location, &wf_id)
    );
    state
        .store
        .cancel_execution(&name)
        .map_err(crate::error::EngineError::Workflow)?;
    Ok(StatusCode::OK)
}

/// Hook the HTTP transport wires `events.create_callback_endpoint`'s issued
/// URL to: a POST here wakes the matching `events.await_callback` (§4.5).
async fn deliver_callback(
    Path(callback_id): Path<String>,
    body: axum::body::Bytes,
) -> StatusCode {
    let payload: serde_json::Value =
        serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    crate::stdlib::events::deliver(&callback_id, Value::from_json(&payload));
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        AppState {
            store: Store::new(),
            registry: Arc::new(Registry::with_builtins()),
        }
    }

    #[tokio::test]
    async fn deploy_then_get_workflow_round_trips() {
        let app = build_router(test_state());
        let deploy = Request::builder()
            .method("PUT")
            .uri("/v1/projects/p/locations/l/workflows/wf-a")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({"sourceCode": "main:\n  steps:\n    - done:\n        return: 1\n"})
                    .to_string(),
            ))
            .unwrap();
        let resp = app.clone().oneshot(deploy).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let get = Request::builder()
            .uri("/v1/projects/p/locations/l/workflows/wf-a")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(get).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_unknown_workflow_is_404() {
        let app = build_router(test_state());
        let req = Request::builder()
            .uri("/v1/projects/p/locations/l/workflows/missing")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_execution_runs_workflow_to_completion() {
        let app = build_router(test_state());
        let deploy = Request::builder()
            .method("PUT")
            .uri("/v1/projects/p/locations/l/workflows/wf-a")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({"sourceCode": "main:\n  steps:\n    - done:\n        return: 7\n"})
                    .to_string(),
            ))
            .unwrap();
        app.clone().oneshot(deploy).await.unwrap();

        let create = Request::builder()
            .method("POST")
            .uri("/v1/projects/p/locations/l/workflows/wf-a/executions")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let resp = app.oneshot(create).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
