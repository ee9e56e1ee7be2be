/// Workflow management REST API endpoints
///
/// Publishing validates the definition, stores it, hot-swaps it into the
/// registry and syncs its cron schedule. Executions already running keep the
/// definition they were claimed with.

use crate::{
    api::{api_error, internal_error, object_body, ApiError, AppState},
    storage::NewExecution,
    workflow::{registry::validate_workflow, types::Workflow},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Response for workflow creation/update operations
#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub id: String,
    pub message: String,
}

/// Request body for workflow creation and update
#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub workflow: Workflow,
}

pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", post(create_workflow).get(list_workflows))
        .route(
            "/api/workflows/{id}",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route("/api/workflows/{id}/executions", post(start_execution))
}

/// Validate, store, publish and schedule a workflow
async fn publish(state: &AppState, workflow: Workflow) -> Result<(), ApiError> {
    if workflow.name.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "workflow name must not be empty"));
    }
    validate_workflow(&workflow).map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    state
        .registry
        .register(workflow.clone())
        .await
        .map_err(|e| internal_error("Failed to register workflow", e))?;
    state
        .scheduler
        .sync_workflow_schedule(&workflow)
        .await
        .map_err(|e| internal_error("Failed to sync workflow schedule", e))?;
    Ok(())
}

/// POST /api/workflows
/// Body: { "workflow": { "id": "...", "name": "...", "trigger": {...}, "nodes": [...] } }
async fn create_workflow(
    State(state): State<AppState>,
    Json(payload): Json<CreateWorkflowRequest>,
) -> Result<(StatusCode, Json<WorkflowResponse>), ApiError> {
    let workflow = payload.workflow;

    match state.registry.storage().get_workflow(&workflow.id).await {
        Ok(Some(_)) => {
            return Err(api_error(
                StatusCode::CONFLICT,
                format!("workflow '{}' already exists", workflow.id),
            ))
        }
        Ok(None) => {}
        Err(e) => return Err(internal_error("Failed to look up workflow", e)),
    }

    let id = workflow.id.clone();
    let name = workflow.name.clone();
    publish(&state, workflow).await?;

    tracing::info!("🔥 Created workflow: {} ({})", id, name);
    Ok((
        StatusCode::CREATED,
        Json(WorkflowResponse {
            id,
            message: format!("Workflow '{}' created successfully", name),
        }),
    ))
}

/// GET /api/workflows
async fn list_workflows(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let workflows = state
        .registry
        .storage()
        .list_workflows()
        .await
        .map_err(|e| internal_error("Failed to list workflows", e))?;
    Ok(Json(json!({ "workflows": workflows })))
}

/// GET /api/workflows/{id}
async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, ApiError> {
    match state.registry.storage().get_workflow(&id).await {
        Ok(Some(workflow)) => Ok(Json(workflow)),
        Ok(None) => Err(api_error(StatusCode::NOT_FOUND, format!("workflow '{id}' not found"))),
        Err(e) => Err(internal_error("Failed to get workflow", e)),
    }
}

/// PUT /api/workflows/{id}
async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<CreateWorkflowRequest>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    let mut workflow = payload.workflow;
    workflow.id = id.clone();

    match state.registry.storage().get_workflow(&id).await {
        Ok(Some(_)) => {}
        Ok(None) => return Err(api_error(StatusCode::NOT_FOUND, format!("workflow '{id}' not found"))),
        Err(e) => return Err(internal_error("Failed to look up workflow", e)),
    }

    let name = workflow.name.clone();
    publish(&state, workflow).await?;

    tracing::info!("🔥 Hot-reloaded workflow: {} ({})", id, name);
    Ok(Json(WorkflowResponse {
        id,
        message: format!("Workflow '{}' updated successfully", name),
    }))
}

/// DELETE /api/workflows/{id}
///
/// Executions of the workflow that are still waiting fail when next claimed.
async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state
        .scheduler
        .remove_workflow_schedule(&id)
        .await
        .map_err(|e| internal_error("Failed to remove workflow schedule", e))?;

    match state.registry.remove_workflow(&id).await {
        Ok(true) => Ok(Json(json!({ "message": "Workflow deleted successfully" }))),
        Ok(false) => Err(api_error(StatusCode::NOT_FOUND, format!("workflow '{id}' not found"))),
        Err(e) => Err(internal_error("Failed to delete workflow", e)),
    }
}

/// POST /api/workflows/{id}/executions
/// Body (optional): { "trigger_data": {...}, "variables": {...} }
async fn start_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: String,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Some(compiled) = state.registry.get_workflow(&id) else {
        return Err(api_error(StatusCode::NOT_FOUND, format!("workflow '{id}' not found")));
    };

    let mut request = object_body(&body)?;
    let trigger_data = take_object(&mut request, "trigger_data")?;
    let variables = take_object(&mut request, "variables")?;

    let execution = state
        .store
        .create_execution(
            NewExecution::for_workflow(&compiled.workflow, trigger_data, variables),
            state.clock.now(),
        )
        .await
        .map_err(|e| internal_error("Failed to create execution", e))?;

    tracing::info!("🚀 Manual execution {} queued for workflow {}", execution.id, id);
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "execution_id": execution.id, "status": execution.status })),
    ))
}

fn take_object(request: &mut Map<String, Value>, key: &str) -> Result<Map<String, Value>, ApiError> {
    match request.remove(key) {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map),
        Some(_) => Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("'{key}' must be an object"),
        )),
    }
}
