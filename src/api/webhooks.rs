/// Webhook trigger endpoint
///
/// `ANY /webhook/{workflow_id}/{*path}` queues an execution of a workflow whose
/// trigger is a webhook with the same path. The JSON body becomes the trigger
/// data; the execution itself runs on the worker pool.

use crate::{
    api::{api_error, internal_error, object_body, ApiError, AppState},
    storage::NewExecution,
    workflow::types::TriggerSpec,
};
use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    response::Json,
    routing::any,
    Router,
};
use serde_json::{json, Map, Value};

pub fn create_webhook_routes() -> Router<AppState> {
    Router::new().route("/webhook/{workflow_id}/{*path}", any(execute_webhook))
}

fn same_path(configured: &str, requested: &str) -> bool {
    configured.trim_matches('/') == requested.trim_matches('/')
}

async fn execute_webhook(
    State(state): State<AppState>,
    Path((workflow_id, webhook_path)): Path<(String, String)>,
    method: Method,
    body: String,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    tracing::info!("📥 Webhook request received: {} {}/{}", method, workflow_id, webhook_path);

    let Some(compiled) = state.registry.get_workflow(&workflow_id) else {
        tracing::warn!("❌ Webhook called for unknown workflow: {}", workflow_id);
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("workflow '{workflow_id}' not found"),
        ));
    };

    match &compiled.workflow.trigger {
        TriggerSpec::Webhook { path } if same_path(path, &webhook_path) => {}
        _ => {
            tracing::warn!(
                "❌ Workflow {} has no webhook trigger for path '{}'",
                workflow_id,
                webhook_path
            );
            return Err(api_error(
                StatusCode::NOT_FOUND,
                format!("no webhook '{webhook_path}' on workflow '{workflow_id}'"),
            ));
        }
    }

    let trigger_data = object_body(&body).inspect_err(|_| {
        tracing::warn!("❌ Invalid JSON payload for webhook: {}/{}", workflow_id, webhook_path);
    })?;

    let execution = state
        .store
        .create_execution(
            NewExecution::for_workflow(&compiled.workflow, trigger_data, Map::new()),
            state.clock.now(),
        )
        .await
        .map_err(|e| internal_error("Failed to queue webhook execution", e))?;

    tracing::info!("🚀 Webhook queued execution {} for workflow {}", execution.id, workflow_id);
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "execution_id": execution.id })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_match_ignoring_slashes() {
        assert!(same_path("/new-hire", "new-hire"));
        assert!(same_path("hr/offer/", "hr/offer"));
        assert!(!same_path("new-hire", "new-hire/extra"));
    }
}
