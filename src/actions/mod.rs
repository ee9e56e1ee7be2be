//! Action executors
//!
//! Action nodes name an `action_type`; the registry maps that name to a
//! stateless [`ActionExecutor`]. The built-in set covers email, tasks,
//! notifications and generic records. New actions are added by implementing
//! the trait and registering an instance.

pub mod delivery;
pub mod email;
pub mod notifications;
pub mod records;
pub mod tasks;

use crate::error::ActionError;
use crate::tenant::TenantDatabaseManager;
use crate::workflow::types::ExecutionContext;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub use delivery::DeliveryClient;

/// Everything an action may know about the execution invoking it
#[derive(Debug, Clone, Copy)]
pub struct ActionContext<'a> {
    pub execution_id: &'a str,
    pub workflow_id: &'a str,
    pub tenant_id: &'a str,
    pub node_id: &'a str,
    pub context: &'a ExecutionContext,
    pub now: DateTime<Utc>,
}

/// Handler for one action type
///
/// `params` arrive with every template already resolved.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, params: &Value, ctx: &ActionContext<'_>) -> Result<Value, ActionError>;
}

/// Built-in action types
pub const BUILTIN_ACTIONS: [&str; 10] = [
    "send_email",
    "create_task",
    "update_task",
    "complete_task",
    "send_notification",
    "send_bulk_notification",
    "create_record",
    "update_record",
    "delete_record",
    "run_query",
];

/// `action_type` -> executor lookup
#[derive(Clone, Default)]
pub struct ActionRegistry {
    executors: HashMap<String, Arc<dyn ActionExecutor>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in action
    pub fn with_builtins(tenants: Arc<TenantDatabaseManager>, delivery: Arc<DeliveryClient>) -> Self {
        let mut registry = Self::new();

        registry.register(
            "send_email",
            Arc::new(email::SendEmail::new(Arc::clone(&tenants), delivery)),
        );

        registry.register("create_task", Arc::new(tasks::CreateTask::new(Arc::clone(&tenants))));
        registry.register("update_task", Arc::new(tasks::UpdateTask::new(Arc::clone(&tenants))));
        registry.register("complete_task", Arc::new(tasks::CompleteTask::new(Arc::clone(&tenants))));

        registry.register(
            "send_notification",
            Arc::new(notifications::SendNotification::new(Arc::clone(&tenants))),
        );
        registry.register(
            "send_bulk_notification",
            Arc::new(notifications::SendBulkNotification::new(Arc::clone(&tenants))),
        );

        registry.register("create_record", Arc::new(records::CreateRecord::new(Arc::clone(&tenants))));
        registry.register("update_record", Arc::new(records::UpdateRecord::new(Arc::clone(&tenants))));
        registry.register("delete_record", Arc::new(records::DeleteRecord::new(Arc::clone(&tenants))));
        registry.register("run_query", Arc::new(records::RunQuery::new(tenants)));

        tracing::info!("🧩 Registered {} built-in actions", registry.executors.len());
        registry
    }

    /// Add or replace the executor of an action type
    pub fn register(&mut self, action_type: impl Into<String>, executor: Arc<dyn ActionExecutor>) {
        self.executors.insert(action_type.into(), executor);
    }

    pub fn get(&self, action_type: &str) -> Option<Arc<dyn ActionExecutor>> {
        self.executors.get(action_type).cloned()
    }

    pub fn action_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("action_types", &self.action_types())
            .finish()
    }
}

// Parameter helpers shared by the built-in actions

pub(crate) fn params_object(params: &Value) -> Result<&Map<String, Value>, ActionError> {
    params
        .as_object()
        .ok_or_else(|| ActionError::invalid("params must be an object"))
}

pub(crate) fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, ActionError> {
    match params.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s),
        Some(Value::String(_)) | Some(Value::Null) | None => {
            Err(ActionError::invalid(format!("missing '{key}'")))
        }
        Some(_) => Err(ActionError::invalid(format!("'{key}' must be a string"))),
    }
}

pub(crate) fn optional_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Identifier that may be written as a string or a number
pub(crate) fn required_id(params: &Value, key: &str) -> Result<String, ActionError> {
    match params.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(ActionError::invalid(format!("missing '{key}'"))),
    }
}

pub(crate) fn required_object(params: &Value, key: &str) -> Result<Map<String, Value>, ActionError> {
    params
        .get(key)
        .and_then(Value::as_object)
        .cloned()
        .ok_or_else(|| ActionError::invalid(format!("'{key}' must be an object")))
}

/// Provenance fields stamped onto records created by workflows
pub(crate) fn provenance(ctx: &ActionContext<'_>) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("workflow_id".into(), Value::String(ctx.workflow_id.to_string()));
    fields.insert("execution_id".into(), Value::String(ctx.execution_id.to_string()));
    fields.insert("created_at".into(), Value::String(ctx.now.to_rfc3339()));
    fields
}
