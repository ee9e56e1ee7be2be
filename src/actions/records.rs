//! Generic record actions: `create_record`, `update_record`, `delete_record`, `run_query`

use crate::actions::{
    params_object, required_id, required_object, required_str, ActionContext, ActionExecutor,
};
use crate::error::ActionError;
use crate::tenant::{records, RecordQuery, TenantDatabaseManager};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;

fn collection(params: &Value) -> Result<&str, ActionError> {
    let name = required_str(params, "collection")?;
    records::validate_name(name).map_err(|e| ActionError::invalid(e.to_string()))?;
    Ok(name)
}

/// Params: `{ collection, data: { ... } }`
pub struct CreateRecord {
    tenants: Arc<TenantDatabaseManager>,
}

impl CreateRecord {
    pub fn new(tenants: Arc<TenantDatabaseManager>) -> Self {
        Self { tenants }
    }
}

#[async_trait]
impl ActionExecutor for CreateRecord {
    async fn execute(&self, params: &Value, ctx: &ActionContext<'_>) -> Result<Value, ActionError> {
        let collection = collection(params)?;
        let data = required_object(params, "data")?;

        let record = self
            .tenants
            .records(ctx.tenant_id)
            .await?
            .insert(collection, data, ctx.now)
            .await?;

        tracing::info!("💾 Created {} record {}", collection, record["id"]);
        Ok(record)
    }
}

/// Params: `{ collection, id, data: { ... } }`
pub struct UpdateRecord {
    tenants: Arc<TenantDatabaseManager>,
}

impl UpdateRecord {
    pub fn new(tenants: Arc<TenantDatabaseManager>) -> Self {
        Self { tenants }
    }
}

#[async_trait]
impl ActionExecutor for UpdateRecord {
    async fn execute(&self, params: &Value, ctx: &ActionContext<'_>) -> Result<Value, ActionError> {
        let collection = collection(params)?;
        let id = required_id(params, "id")?;
        let data = required_object(params, "data")?;

        self.tenants
            .records(ctx.tenant_id)
            .await?
            .update(collection, &id, data, ctx.now)
            .await?
            .ok_or_else(|| ActionError::invalid(format!("{collection} record '{id}' not found")))
    }
}

/// Params: `{ collection, id }`. Deleting a missing record reports `deleted: false`.
pub struct DeleteRecord {
    tenants: Arc<TenantDatabaseManager>,
}

impl DeleteRecord {
    pub fn new(tenants: Arc<TenantDatabaseManager>) -> Self {
        Self { tenants }
    }
}

#[async_trait]
impl ActionExecutor for DeleteRecord {
    async fn execute(&self, params: &Value, ctx: &ActionContext<'_>) -> Result<Value, ActionError> {
        let collection = collection(params)?;
        let id = required_id(params, "id")?;

        let deleted = self
            .tenants
            .records(ctx.tenant_id)
            .await?
            .delete(collection, &id)
            .await?;

        Ok(json!({ "id": id, "deleted": deleted }))
    }
}

/// Params: `{ collection, filters?, order_by?, descending?, limit? }`
pub struct RunQuery {
    tenants: Arc<TenantDatabaseManager>,
}

impl RunQuery {
    pub fn new(tenants: Arc<TenantDatabaseManager>) -> Self {
        Self { tenants }
    }
}

#[async_trait]
impl ActionExecutor for RunQuery {
    async fn execute(&self, params: &Value, ctx: &ActionContext<'_>) -> Result<Value, ActionError> {
        let object = params_object(params)?;
        let collection = collection(params)?;

        let filters = match object.get("filters") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => return Err(ActionError::invalid("'filters' must be an object")),
        };
        for field in filters.keys() {
            records::validate_field(field).map_err(|e| ActionError::invalid(e.to_string()))?;
        }

        let order_by = object.get("order_by").and_then(Value::as_str).map(str::to_string);
        if let Some(field) = &order_by {
            records::validate_field(field).map_err(|e| ActionError::invalid(e.to_string()))?;
        }

        let limit = match object.get("limit") {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                value
                    .as_i64()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| ActionError::invalid("'limit' must be a positive integer"))?,
            ),
        };

        let query = RecordQuery {
            collection: collection.to_string(),
            filters,
            order_by,
            descending: object.get("descending").and_then(Value::as_bool).unwrap_or(false),
            limit,
        };

        let rows = self.tenants.records(ctx.tenant_id).await?.query(&query).await?;
        tracing::debug!("📖 Query on {} returned {} records", collection, rows.len());

        Ok(json!({
            "count": rows.len(),
            "records": rows,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::testing::ctx;
    use crate::workflow::types::ExecutionContext;

    #[tokio::test]
    async fn create_update_query_delete() {
        let tenants = Arc::new(TenantDatabaseManager::in_memory());
        let context = ExecutionContext::default();
        let c = ctx(&context);

        let created = CreateRecord::new(Arc::clone(&tenants))
            .execute(
                &json!({ "collection": "candidates", "data": { "name": "Lee", "stage": "screen" } }),
                &c,
            )
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap().to_string();

        UpdateRecord::new(Arc::clone(&tenants))
            .execute(
                &json!({ "collection": "candidates", "id": id, "data": { "stage": "offer" } }),
                &c,
            )
            .await
            .unwrap();

        let found = RunQuery::new(Arc::clone(&tenants))
            .execute(
                &json!({ "collection": "candidates", "filters": { "stage": "offer" } }),
                &c,
            )
            .await
            .unwrap();
        assert_eq!(found["count"], 1);
        assert_eq!(found["records"][0]["name"], "Lee");

        let delete = DeleteRecord::new(Arc::clone(&tenants));
        let first = delete
            .execute(&json!({ "collection": "candidates", "id": id }), &c)
            .await
            .unwrap();
        let second = delete
            .execute(&json!({ "collection": "candidates", "id": id }), &c)
            .await
            .unwrap();
        assert_eq!(first["deleted"], true);
        assert_eq!(second["deleted"], false);
    }

    #[tokio::test]
    async fn unsafe_names_are_invalid_params() {
        let tenants = Arc::new(TenantDatabaseManager::in_memory());
        let context = ExecutionContext::default();
        let c = ctx(&context);

        let err = CreateRecord::new(Arc::clone(&tenants))
            .execute(&json!({ "collection": "x; drop", "data": {} }), &c)
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidParams(_)));

        let err = RunQuery::new(tenants)
            .execute(&json!({ "collection": "x", "order_by": "a b" }), &c)
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidParams(_)));
    }
}
