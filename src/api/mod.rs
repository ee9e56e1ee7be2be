/// HTTP API Layer
///
/// - Workflow CRUD and manual starts under `/api/workflows`
/// - Execution inspection and cancellation under `/api/executions`
/// - Webhook triggers at `/webhook/{workflow_id}/{*path}`

pub mod executions;
pub mod webhooks;
pub mod workflows;

use crate::{
    runtime::{clock::Clock, engine::ExecutionEngine, scheduler::Scheduler},
    storage::ExecutionStore,
    workflow::registry::WorkflowRegistry,
};
use axum::{http::StatusCode, response::Json, Router};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Shared resources of every handler
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<WorkflowRegistry>,
    pub store: ExecutionStore,
    pub engine: Arc<ExecutionEngine>,
    pub scheduler: Scheduler,
    pub clock: Arc<dyn Clock>,
}

/// Error response: status code plus `{ "error": message }`
pub type ApiError = (StatusCode, Json<Value>);

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

/// Log an infrastructure failure and hide its details from the caller
pub fn internal_error(context: &str, error: anyhow::Error) -> ApiError {
    tracing::error!("❌ {}: {:#}", context, error);
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}

/// Parse an optional JSON object body; an empty body is an empty object
pub(crate) fn object_body(body: &str) -> Result<Map<String, Value>, ApiError> {
    if body.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(api_error(StatusCode::BAD_REQUEST, "body must be a JSON object")),
        Err(e) => Err(api_error(StatusCode::BAD_REQUEST, format!("invalid JSON body: {e}"))),
    }
}

/// All API routes bound to `state`
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(workflows::create_workflow_routes())
        .merge(executions::create_execution_routes())
        .merge(webhooks::create_webhook_routes())
        .with_state(state)
}
