//! Task actions: `create_task`, `update_task`, `complete_task`
//!
//! Tasks are records of the tenant's `tasks` collection.

use crate::actions::{
    optional_str, provenance, required_id, required_object, required_str, ActionContext,
    ActionExecutor,
};
use crate::error::ActionError;
use crate::tenant::TenantDatabaseManager;
use async_trait::async_trait;
use chrono::Duration;
use serde_json::{json, Map, Value};
use std::sync::Arc;

const TASKS: &str = "tasks";

fn with_task_id(record: Value) -> Value {
    let mut output = match record {
        Value::Object(map) => map,
        other => return other,
    };
    if let Some(id) = output.get("id").cloned() {
        output.insert("task_id".into(), id);
    }
    Value::Object(output)
}

/// Params: `{ title, description?, assignee_id?, priority?, due_date? | due_in_days? }`
pub struct CreateTask {
    tenants: Arc<TenantDatabaseManager>,
}

impl CreateTask {
    pub fn new(tenants: Arc<TenantDatabaseManager>) -> Self {
        Self { tenants }
    }
}

#[async_trait]
impl ActionExecutor for CreateTask {
    async fn execute(&self, params: &Value, ctx: &ActionContext<'_>) -> Result<Value, ActionError> {
        let title = required_str(params, "title")?;

        let due_date = match (optional_str(params, "due_date"), params.get("due_in_days")) {
            (Some(date), _) => Value::String(date.to_string()),
            (None, Some(days)) => {
                let days = days
                    .as_i64()
                    .ok_or_else(|| ActionError::invalid("'due_in_days' must be an integer"))?;
                let due = ctx.now + Duration::days(days);
                Value::String(due.date_naive().to_string())
            }
            (None, None) => Value::Null,
        };

        let mut data = provenance(ctx);
        data.insert("title".into(), Value::String(title.to_string()));
        data.insert(
            "description".into(),
            params.get("description").cloned().unwrap_or(Value::Null),
        );
        data.insert(
            "assignee_id".into(),
            params.get("assignee_id").cloned().unwrap_or(Value::Null),
        );
        data.insert(
            "priority".into(),
            Value::String(optional_str(params, "priority").unwrap_or("normal").to_string()),
        );
        data.insert("due_date".into(), due_date);
        data.insert("status".into(), Value::String("open".into()));

        let record = self
            .tenants
            .records(ctx.tenant_id)
            .await?
            .insert(TASKS, data, ctx.now)
            .await?;

        tracing::info!("📝 Created task '{}' (execution {})", title, ctx.execution_id);
        Ok(with_task_id(record))
    }
}

/// Params: `{ task_id, changes: { ... } }`
pub struct UpdateTask {
    tenants: Arc<TenantDatabaseManager>,
}

impl UpdateTask {
    pub fn new(tenants: Arc<TenantDatabaseManager>) -> Self {
        Self { tenants }
    }
}

#[async_trait]
impl ActionExecutor for UpdateTask {
    async fn execute(&self, params: &Value, ctx: &ActionContext<'_>) -> Result<Value, ActionError> {
        let task_id = required_id(params, "task_id")?;
        let mut changes = required_object(params, "changes")?;
        changes.insert("updated_at".into(), Value::String(ctx.now.to_rfc3339()));

        let record = self
            .tenants
            .records(ctx.tenant_id)
            .await?
            .update(TASKS, &task_id, changes, ctx.now)
            .await?
            .ok_or_else(|| ActionError::invalid(format!("task '{task_id}' not found")))?;

        Ok(with_task_id(record))
    }
}

/// Params: `{ task_id, note? }`. Completing a completed task is a no-op.
pub struct CompleteTask {
    tenants: Arc<TenantDatabaseManager>,
}

impl CompleteTask {
    pub fn new(tenants: Arc<TenantDatabaseManager>) -> Self {
        Self { tenants }
    }
}

#[async_trait]
impl ActionExecutor for CompleteTask {
    async fn execute(&self, params: &Value, ctx: &ActionContext<'_>) -> Result<Value, ActionError> {
        let task_id = required_id(params, "task_id")?;
        let records = self.tenants.records(ctx.tenant_id).await?;

        let existing = records
            .get(TASKS, &task_id)
            .await?
            .ok_or_else(|| ActionError::invalid(format!("task '{task_id}' not found")))?;
        if existing.get("status").and_then(Value::as_str) == Some("completed") {
            let mut output = with_task_id(existing);
            if let Value::Object(map) = &mut output {
                map.insert("already_completed".into(), Value::Bool(true));
            }
            return Ok(output);
        }

        let mut changes = Map::new();
        changes.insert("status".into(), json!("completed"));
        changes.insert("completed_at".into(), Value::String(ctx.now.to_rfc3339()));
        if let Some(note) = optional_str(params, "note") {
            changes.insert("completion_note".into(), Value::String(note.to_string()));
        }

        let record = records
            .update(TASKS, &task_id, changes, ctx.now)
            .await?
            .ok_or_else(|| ActionError::invalid(format!("task '{task_id}' not found")))?;

        tracing::info!("✅ Completed task {} (execution {})", task_id, ctx.execution_id);
        Ok(with_task_id(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::testing::ctx;
    use crate::workflow::types::ExecutionContext;

    #[tokio::test]
    async fn task_lifecycle() {
        let tenants = Arc::new(TenantDatabaseManager::in_memory());
        let context = ExecutionContext::default();

        let created = CreateTask::new(Arc::clone(&tenants))
            .execute(
                &json!({ "title": "Prepare contract", "assignee_id": 12, "due_in_days": 3 }),
                &ctx(&context),
            )
            .await
            .unwrap();
        let task_id = created["task_id"].as_str().unwrap().to_string();
        assert_eq!(created["status"], "open");
        assert_eq!(created["priority"], "normal");
        assert_eq!(created["due_date"], "2024-04-05");
        assert_eq!(created["execution_id"], "ex-1");

        let updated = UpdateTask::new(Arc::clone(&tenants))
            .execute(
                &json!({ "task_id": task_id, "changes": { "priority": "high" } }),
                &ctx(&context),
            )
            .await
            .unwrap();
        assert_eq!(updated["priority"], "high");

        let complete = CompleteTask::new(Arc::clone(&tenants));
        let done = complete
            .execute(&json!({ "task_id": task_id, "note": "signed" }), &ctx(&context))
            .await
            .unwrap();
        assert_eq!(done["status"], "completed");
        assert_eq!(done["completion_note"], "signed");

        let again = complete
            .execute(&json!({ "task_id": task_id }), &ctx(&context))
            .await
            .unwrap();
        assert_eq!(again["already_completed"], true);
    }

    #[tokio::test]
    async fn unknown_task_is_invalid() {
        let tenants = Arc::new(TenantDatabaseManager::in_memory());
        let context = ExecutionContext::default();
        let err = CompleteTask::new(tenants)
            .execute(&json!({ "task_id": "nope" }), &ctx(&context))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidParams(_)));
    }
}
