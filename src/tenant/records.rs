//! Document-style record storage inside a tenant database
//!
//! Records are JSON objects grouped by collection ("employees", "contracts",
//! "tasks", ...). Fields are addressed with SQLite's `json_extract`, so
//! collections need no migrations when new fields appear.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{sqlite::SqlitePool, Row};
use uuid::Uuid;

pub const DEFAULT_QUERY_LIMIT: i64 = 100;
pub const MAX_QUERY_LIMIT: i64 = 1000;

/// Filter, ordering and paging for [`RecordStore::query`]
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    pub collection: String,
    /// Field path -> expected value (equality; `null` matches missing fields)
    pub filters: Map<String, Value>,
    pub order_by: Option<String>,
    pub descending: bool,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct RecordStore {
    pool: SqlitePool,
}

enum Bound {
    Text(String),
    Int(i64),
    Float(f64),
}

impl RecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a record; an `id` field in `data` is used as the record id
    pub async fn insert(
        &self,
        collection: &str,
        mut data: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<Value> {
        validate_name(collection)?;
        let id = match data.remove("id") {
            Some(Value::String(id)) if !id.is_empty() => id,
            Some(Value::Number(n)) => n.to_string(),
            _ => Uuid::new_v4().to_string(),
        };

        sqlx::query(
            "INSERT INTO records (id, collection, data, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(collection)
        .bind(serde_json::to_string(&data)?)
        .bind(now.timestamp_millis())
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await?;

        tracing::debug!("💾 Inserted record {}/{}", collection, id);
        Ok(with_id(&id, data))
    }

    pub async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT id, data FROM records WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| record_from_parts(row.try_get("id")?, row.try_get("data")?))
            .transpose()
    }

    /// Shallow-merge `changes` into a record; `None` if it does not exist
    pub async fn update(
        &self,
        collection: &str,
        id: &str,
        changes: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<Option<Value>> {
        let mut tx = self.pool.begin().await?;

        let raw: Option<String> =
            sqlx::query_scalar("SELECT data FROM records WHERE collection = ? AND id = ?")
                .bind(collection)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(raw) = raw else {
            tx.rollback().await?;
            return Ok(None);
        };

        let mut data: Map<String, Value> = serde_json::from_str(&raw)?;
        for (key, value) in changes {
            if key != "id" {
                data.insert(key, value);
            }
        }

        sqlx::query("UPDATE records SET data = ?, updated_at = ? WHERE collection = ? AND id = ?")
            .bind(serde_json::to_string(&data)?)
            .bind(now.timestamp_millis())
            .bind(collection)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some(with_id(id, data)))
    }

    pub async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM records WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Equality-filtered listing of a collection
    pub async fn query(&self, query: &RecordQuery) -> Result<Vec<Value>> {
        validate_name(&query.collection)?;

        let mut sql = String::from("SELECT id, data FROM records WHERE collection = ?");
        let mut binds = vec![Bound::Text(query.collection.clone())];

        for (field, expected) in &query.filters {
            validate_field(field)?;
            binds.push(Bound::Text(json_path(field)));
            match expected {
                Value::Null => sql.push_str(" AND json_extract(data, ?) IS NULL"),
                Value::Bool(b) => {
                    sql.push_str(" AND json_extract(data, ?) = ?");
                    binds.push(Bound::Int(i64::from(*b)));
                }
                Value::Number(n) => {
                    sql.push_str(" AND json_extract(data, ?) = ?");
                    binds.push(match n.as_i64() {
                        Some(i) => Bound::Int(i),
                        None => Bound::Float(n.as_f64().unwrap_or_default()),
                    });
                }
                Value::String(s) => {
                    sql.push_str(" AND json_extract(data, ?) = ?");
                    binds.push(Bound::Text(s.clone()));
                }
                other => {
                    // arrays and objects compare by their JSON text
                    sql.push_str(" AND json_extract(data, ?) = json(?)");
                    binds.push(Bound::Text(other.to_string()));
                }
            }
        }

        match &query.order_by {
            Some(field) => {
                validate_field(field)?;
                sql.push_str(" ORDER BY json_extract(data, ?)");
                binds.push(Bound::Text(json_path(field)));
                if query.descending {
                    sql.push_str(" DESC");
                }
            }
            None => sql.push_str(if query.descending {
                " ORDER BY created_at DESC, id"
            } else {
                " ORDER BY created_at, id"
            }),
        }

        let limit = query
            .limit
            .unwrap_or(DEFAULT_QUERY_LIMIT)
            .clamp(1, MAX_QUERY_LIMIT);
        sql.push_str(" LIMIT ?");
        binds.push(Bound::Int(limit));

        tracing::debug!("📝 Record query: {}", sql);

        let mut statement = sqlx::query(&sql);
        for bound in binds {
            statement = match bound {
                Bound::Text(s) => statement.bind(s),
                Bound::Int(i) => statement.bind(i),
                Bound::Float(f) => statement.bind(f),
            };
        }

        let rows = statement.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| record_from_parts(row.try_get("id")?, row.try_get("data")?))
            .collect()
    }

    /// Records whose date field (`YYYY-MM-DD...`) falls within `[from, to]`
    pub async fn in_date_range(
        &self,
        collection: &str,
        field: &str,
        from: &str,
        to: &str,
    ) -> Result<Vec<Value>> {
        validate_field(field)?;
        let rows = sqlx::query(
            r#"
            SELECT id, data FROM records
            WHERE collection = ?
              AND substr(json_extract(data, ?), 1, 10) BETWEEN ? AND ?
            ORDER BY json_extract(data, ?)
            "#,
        )
        .bind(collection)
        .bind(json_path(field))
        .bind(from)
        .bind(to)
        .bind(json_path(field))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| record_from_parts(row.try_get("id")?, row.try_get("data")?))
            .collect()
    }
}

fn with_id(id: &str, data: Map<String, Value>) -> Value {
    let mut record = Map::with_capacity(data.len() + 1);
    record.insert("id".to_string(), Value::String(id.to_string()));
    record.extend(data);
    Value::Object(record)
}

fn record_from_parts(id: String, raw: String) -> Result<Value> {
    let data: Map<String, Value> = serde_json::from_str(&raw)?;
    Ok(with_id(&id, data))
}

fn json_path(field: &str) -> String {
    format!("$.{field}")
}

/// Collection names: letters, digits and underscores
pub fn validate_name(name: &str) -> Result<()> {
    if !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(anyhow::anyhow!("Invalid collection name: '{}'", name))
    }
}

/// Field paths: dot-separated names
pub fn validate_field(field: &str) -> Result<()> {
    if !field.is_empty()
        && field
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_alphanumeric() || c == '_'))
    {
        Ok(())
    } else {
        Err(anyhow::anyhow!("Invalid field path: '{}'", field))
    }
}
