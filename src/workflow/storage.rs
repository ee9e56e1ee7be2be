/// SQLite persistence layer for workflow definitions
///
/// Workflows live in the engine database next to executions. The definition is
/// stored as JSON; tenant and trigger kind are copied into columns for listing.

use crate::workflow::types::Workflow;
use anyhow::Result;
use sqlx::{sqlite::SqlitePool, Row};
use std::collections::HashMap;

/// SQLite-based workflow storage manager
#[derive(Debug, Clone)]
pub struct WorkflowStorage {
    pool: SqlitePool,
}

impl WorkflowStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the workflows table; safe to call multiple times
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                name TEXT NOT NULL,
                trigger_type TEXT NOT NULL,
                definition JSON NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_workflows_tenant
            ON workflows(tenant_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert or replace a workflow definition
    pub async fn save_workflow(&self, workflow: &Workflow) -> Result<()> {
        let definition_json = serde_json::to_string(workflow)?;

        sqlx::query(
            r#"
            INSERT INTO workflows (id, tenant_id, name, trigger_type, definition, updated_at)
            VALUES (?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                tenant_id = excluded.tenant_id,
                name = excluded.name,
                trigger_type = excluded.trigger_type,
                definition = excluded.definition,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&workflow.id)
        .bind(&workflow.tenant_id)
        .bind(&workflow.name)
        .bind(workflow.trigger.kind())
        .bind(&definition_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>> {
        let row = sqlx::query("SELECT definition FROM workflows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let definition_json: String = row.get("definition");
                Ok(Some(serde_json::from_str(&definition_json)?))
            }
            None => Ok(None),
        }
    }

    /// List all workflows with basic metadata, newest first
    pub async fn list_workflows(&self) -> Result<Vec<WorkflowMetadata>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, name, trigger_type, created_at, updated_at \
             FROM workflows ORDER BY updated_at DESC, id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| WorkflowMetadata {
                id: row.get("id"),
                tenant_id: row.get("tenant_id"),
                name: row.get("name"),
                trigger_type: row.get("trigger_type"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    /// Load every definition for registry initialization
    ///
    /// Rows that no longer deserialize are skipped with a warning instead of
    /// keeping the whole registry from starting.
    pub async fn load_all_workflows(&self) -> Result<HashMap<String, Workflow>> {
        let rows = sqlx::query("SELECT id, definition FROM workflows")
            .fetch_all(&self.pool)
            .await?;

        let mut workflows = HashMap::new();
        for row in rows {
            let id: String = row.get("id");
            let definition_json: String = row.get("definition");
            match serde_json::from_str::<Workflow>(&definition_json) {
                Ok(workflow) => {
                    workflows.insert(id, workflow);
                }
                Err(e) => tracing::warn!("⚠️ Skipping unreadable workflow {}: {}", id, e),
            }
        }

        Ok(workflows)
    }

    pub async fn delete_workflow(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Basic workflow metadata for listing operations
#[derive(Debug, serde::Serialize)]
pub struct WorkflowMetadata {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub trigger_type: String,
    pub created_at: String,
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::connect_in_memory;
    use crate::workflow::types::TriggerSpec;
    use serde_json::json;

    fn workflow(id: &str) -> Workflow {
        serde_json::from_value(json!({
            "id": id,
            "tenant_id": "acme",
            "name": "Onboarding",
            "trigger": { "type": "webhook", "path": "hired" },
            "nodes": [{ "id": "start", "type": "trigger" }]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn save_get_list_delete() {
        let storage = WorkflowStorage::new(connect_in_memory().await.unwrap());
        storage.init_schema().await.unwrap();

        storage.save_workflow(&workflow("wf-1")).await.unwrap();
        let mut changed = workflow("wf-1");
        changed.trigger = TriggerSpec::Manual;
        storage.save_workflow(&changed).await.unwrap();

        let loaded = storage.get_workflow("wf-1").await.unwrap().unwrap();
        assert_eq!(loaded.trigger, TriggerSpec::Manual);

        let listed = storage.list_workflows().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].tenant_id, "acme");
        assert_eq!(listed[0].trigger_type, "manual");

        assert!(storage.delete_workflow("wf-1").await.unwrap());
        assert!(!storage.delete_workflow("wf-1").await.unwrap());
        assert!(storage.load_all_workflows().await.unwrap().is_empty());
    }
}
