//! Tenant database manager for isolated multi-tenant storage
//!
//! Every tenant gets its own SQLite file, `{data_dir}/{tenant_id}/records.db`,
//! holding the business records, tasks, notifications and outbox that
//! actions read and write. Pools are created lazily on first use.

use crate::tenant::{outbox::Outbox, records::RecordStore};
use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
enum Location {
    Directory(PathBuf),
    InMemory,
}

/// Tenant database manager with isolated connection pools
#[derive(Debug)]
pub struct TenantDatabaseManager {
    pools: RwLock<HashMap<String, SqlitePool>>,
    location: Location,
}

impl TenantDatabaseManager {
    /// Manager storing tenant databases under `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            location: Location::Directory(data_dir.into()),
        }
    }

    /// Manager keeping every tenant database in memory (tests, tooling)
    pub fn in_memory() -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            location: Location::InMemory,
        }
    }

    /// Get or create the pool of a tenant
    pub async fn get_tenant_pool(&self, tenant_id: &str) -> Result<SqlitePool> {
        validate_tenant_id(tenant_id)?;

        // Fast path for existing pools
        {
            let pools = self.pools.read().await;
            if let Some(pool) = pools.get(tenant_id) {
                return Ok(pool.clone());
            }
        }

        let mut pools = self.pools.write().await;

        // Double-check: another task may have created it meanwhile
        if let Some(pool) = pools.get(tenant_id) {
            return Ok(pool.clone());
        }

        let pool = match &self.location {
            Location::Directory(data_dir) => {
                let tenant_dir = data_dir.join(tenant_id);
                std::fs::create_dir_all(&tenant_dir).map_err(|e| {
                    anyhow::anyhow!(
                        "Failed to create tenant directory '{}': {}",
                        tenant_dir.display(),
                        e
                    )
                })?;
                let db_path = tenant_dir.join("records.db");
                tracing::info!("🗄️ Creating tenant database pool: {}", db_path.display());

                let options = SqliteConnectOptions::new()
                    .filename(&db_path)
                    .create_if_missing(true);
                SqlitePool::connect_with(options).await?
            }
            Location::InMemory => {
                tracing::debug!("🧪 Creating in-memory tenant database: {}", tenant_id);
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
                    .await?
            }
        };

        init_tenant_schema(&pool).await?;
        pools.insert(tenant_id.to_string(), pool.clone());

        tracing::info!("✅ Tenant database ready: {}", tenant_id);
        Ok(pool)
    }

    pub async fn records(&self, tenant_id: &str) -> Result<RecordStore> {
        Ok(RecordStore::new(self.get_tenant_pool(tenant_id).await?))
    }

    pub async fn outbox(&self, tenant_id: &str) -> Result<Outbox> {
        Ok(Outbox::new(self.get_tenant_pool(tenant_id).await?))
    }

    /// Number of tenants with an open pool
    pub async fn tenant_count(&self) -> usize {
        self.pools.read().await.len()
    }
}

/// Tenant ids become directory names, so they are restricted to `[A-Za-z0-9_-]{1,64}`
pub fn validate_tenant_id(tenant_id: &str) -> Result<()> {
    let valid = !tenant_id.is_empty()
        && tenant_id.len() <= 64
        && tenant_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(anyhow::anyhow!("Invalid tenant id: '{}'", tenant_id))
    }
}

/// Create the tenant tables
async fn init_tenant_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            id TEXT NOT NULL,
            collection TEXT NOT NULL,
            data JSON NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (collection, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_collection ON records(collection)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS outbox (
            id TEXT PRIMARY KEY,
            channel TEXT NOT NULL,
            recipient TEXT NOT NULL,
            payload JSON NOT NULL,
            status TEXT NOT NULL,
            execution_id TEXT,
            node_id TEXT,
            created_at INTEGER NOT NULL,
            sent_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One message per sending node of an execution; NULL origins never collide
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_outbox_origin ON outbox(execution_id, node_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pools_are_cached_per_tenant() {
        let manager = TenantDatabaseManager::in_memory();
        manager.get_tenant_pool("acme").await.unwrap();
        manager.get_tenant_pool("acme").await.unwrap();
        manager.get_tenant_pool("globex").await.unwrap();
        assert_eq!(manager.tenant_count().await, 2);
    }

    #[tokio::test]
    async fn path_like_tenant_ids_are_rejected() {
        let manager = TenantDatabaseManager::in_memory();
        assert!(manager.get_tenant_pool("../etc").await.is_err());
        assert!(manager.get_tenant_pool("").await.is_err());
    }
}
