//! In-app notifications: `send_notification`, `send_bulk_notification`
//!
//! Notifications are records of the `notifications` collection; the UI layer
//! reads them from there.

use crate::actions::{
    optional_str, provenance, required_id, required_str, ActionContext, ActionExecutor,
};
use crate::error::ActionError;
use crate::tenant::TenantDatabaseManager;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;

const NOTIFICATIONS: &str = "notifications";

fn notification(
    ctx: &ActionContext<'_>,
    user_id: &str,
    title: &str,
    message: &str,
    link: Option<&str>,
) -> Map<String, Value> {
    let mut data = provenance(ctx);
    data.insert("user_id".into(), Value::String(user_id.to_string()));
    data.insert("title".into(), Value::String(title.to_string()));
    data.insert("message".into(), Value::String(message.to_string()));
    data.insert("link".into(), link.map_or(Value::Null, |l| Value::String(l.to_string())));
    data.insert("read".into(), Value::Bool(false));
    data
}

/// Params: `{ user_id, title, message, link? }`
pub struct SendNotification {
    tenants: Arc<TenantDatabaseManager>,
}

impl SendNotification {
    pub fn new(tenants: Arc<TenantDatabaseManager>) -> Self {
        Self { tenants }
    }
}

#[async_trait]
impl ActionExecutor for SendNotification {
    async fn execute(&self, params: &Value, ctx: &ActionContext<'_>) -> Result<Value, ActionError> {
        let user_id = required_id(params, "user_id")?;
        let title = required_str(params, "title")?;
        let message = required_str(params, "message")?;
        let link = optional_str(params, "link");

        let record = self
            .tenants
            .records(ctx.tenant_id)
            .await?
            .insert(NOTIFICATIONS, notification(ctx, &user_id, title, message, link), ctx.now)
            .await?;

        tracing::info!("🔔 Notified user {} (execution {})", user_id, ctx.execution_id);
        Ok(json!({
            "notification_id": record["id"],
            "user_id": user_id,
        }))
    }
}

/// Params: `{ user_ids: [...], title, message, link? }`
pub struct SendBulkNotification {
    tenants: Arc<TenantDatabaseManager>,
}

impl SendBulkNotification {
    pub fn new(tenants: Arc<TenantDatabaseManager>) -> Self {
        Self { tenants }
    }
}

#[async_trait]
impl ActionExecutor for SendBulkNotification {
    async fn execute(&self, params: &Value, ctx: &ActionContext<'_>) -> Result<Value, ActionError> {
        let user_ids = user_ids(params)?;
        let title = required_str(params, "title")?;
        let message = required_str(params, "message")?;
        let link = optional_str(params, "link");

        let records = self.tenants.records(ctx.tenant_id).await?;
        let mut notification_ids = Vec::with_capacity(user_ids.len());
        for user_id in &user_ids {
            let record = records
                .insert(NOTIFICATIONS, notification(ctx, user_id, title, message, link), ctx.now)
                .await?;
            notification_ids.push(record["id"].clone());
        }

        tracing::info!(
            "📣 Notified {} users (execution {})",
            user_ids.len(),
            ctx.execution_id
        );
        Ok(json!({
            "notification_ids": notification_ids,
            "count": user_ids.len(),
        }))
    }
}

/// Non-empty, de-duplicated recipient list; order is preserved
fn user_ids(params: &Value) -> Result<Vec<String>, ActionError> {
    let items = params
        .get("user_ids")
        .and_then(Value::as_array)
        .ok_or_else(|| ActionError::invalid("'user_ids' must be a list"))?;

    let mut ids: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let id = match item {
            Value::String(s) if !s.trim().is_empty() => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return Err(ActionError::invalid("'user_ids' entries must be ids")),
        };
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    if ids.is_empty() {
        return Err(ActionError::invalid("'user_ids' is empty"));
    }
    Ok(ids)
}
