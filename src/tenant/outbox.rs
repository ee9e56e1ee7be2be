//! Outbound message queue of a tenant
//!
//! Email actions record every message here before handing it to the delivery
//! client, so operators can see what was sent and what is still queued.
//! A message sent by a workflow node is keyed by `(execution_id, node_id)`:
//! a retried attempt rewrites the same row instead of adding another.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{sqlite::SqlitePool, Row};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OutboxMessage {
    pub id: String,
    pub channel: String,
    pub recipient: String,
    pub payload: Value,
    pub status: String,
    pub execution_id: Option<String>,
    pub node_id: Option<String>,
}

/// The workflow node that produced a message
#[derive(Debug, Clone, Copy)]
pub struct MessageOrigin<'a> {
    pub execution_id: &'a str,
    pub node_id: &'a str,
}

#[derive(Debug, Clone)]
pub struct Outbox {
    pool: SqlitePool,
}

impl Outbox {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Queue a message; returns its id
    ///
    /// With an origin that already has a message, that row is reset to
    /// `queued` with the new content and its id is returned.
    pub async fn enqueue(
        &self,
        channel: &str,
        recipient: &str,
        payload: &Value,
        origin: Option<MessageOrigin<'_>>,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let id: String = sqlx::query_scalar(
            r#"
            INSERT INTO outbox
                (id, channel, recipient, payload, status, execution_id, node_id, created_at)
            VALUES (?, ?, ?, ?, 'queued', ?, ?, ?)
            ON CONFLICT (execution_id, node_id) DO UPDATE SET
                channel = excluded.channel,
                recipient = excluded.recipient,
                payload = excluded.payload,
                status = 'queued',
                sent_at = NULL
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(channel)
        .bind(recipient)
        .bind(serde_json::to_string(payload)?)
        .bind(origin.map(|o| o.execution_id))
        .bind(origin.map(|o| o.node_id))
        .bind(now.timestamp_millis())
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn mark(&self, id: &str, status: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE outbox SET status = ?, sent_at = ? WHERE id = ?")
            .bind(status)
            .bind(now.timestamp_millis())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list(&self, channel: &str) -> Result<Vec<OutboxMessage>> {
        let rows = sqlx::query(
            "SELECT id, channel, recipient, payload, status, execution_id, node_id \
             FROM outbox WHERE channel = ? ORDER BY created_at, rowid",
        )
        .bind(channel)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let payload: String = row.try_get("payload")?;
                Ok(OutboxMessage {
                    id: row.try_get("id")?,
                    channel: row.try_get("channel")?,
                    recipient: row.try_get("recipient")?,
                    payload: serde_json::from_str(&payload)?,
                    status: row.try_get("status")?,
                    execution_id: row.try_get("execution_id")?,
                    node_id: row.try_get("node_id")?,
                })
            })
            .collect()
    }
}
