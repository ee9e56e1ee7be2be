/// Execution inspection and cancellation endpoints

use crate::{
    api::{api_error, internal_error, ApiError, AppState},
    storage::ExecutionStatus,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct ListExecutionsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

pub fn create_execution_routes() -> Router<AppState> {
    Router::new()
        .route("/api/executions", get(list_executions))
        .route("/api/executions/{id}", get(get_execution))
        .route("/api/executions/{id}/cancel", post(cancel_execution))
}

/// GET /api/executions?status=waiting&limit=20
async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<ListExecutionsQuery>,
) -> Result<Json<Value>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<ExecutionStatus>)
        .transpose()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let executions = state
        .store
        .list_executions(status, limit)
        .await
        .map_err(|e| internal_error("Failed to list executions", e))?;
    Ok(Json(json!({ "executions": executions })))
}

/// GET /api/executions/{id}
/// Returns: { "execution": {...}, "logs": [...] }
async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let execution = state
        .store
        .get_execution(&id)
        .await
        .map_err(|e| internal_error("Failed to get execution", e))?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("execution '{id}' not found")))?;
    let logs = state
        .store
        .list_logs(&id)
        .await
        .map_err(|e| internal_error("Failed to list execution logs", e))?;

    Ok(Json(json!({ "execution": execution, "logs": logs })))
}

/// POST /api/executions/{id}/cancel
async fn cancel_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let cancelled = state
        .engine
        .cancel(&id)
        .await
        .map_err(|e| internal_error("Failed to cancel execution", e))?;
    if cancelled {
        return Ok(Json(json!({ "execution_id": id, "status": ExecutionStatus::Failed })));
    }

    match state.store.get_status(&id).await {
        Ok(Some(status)) => Err(api_error(
            StatusCode::CONFLICT,
            format!("execution '{id}' is already {status}"),
        )),
        Ok(None) => Err(api_error(StatusCode::NOT_FOUND, format!("execution '{id}' not found"))),
        Err(e) => Err(internal_error("Failed to look up execution", e)),
    }
}
