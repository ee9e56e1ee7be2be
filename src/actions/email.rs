//! `send_email`
//!
//! Params: `{ "to": "a@x.com" | ["a@x.com", ...], "subject": "...", "body": "...", "cc": [...] }`

use crate::actions::{
    delivery::{Delivery, DeliveryClient},
    optional_str, required_str, ActionContext, ActionExecutor,
};
use crate::error::ActionError;
use crate::tenant::{MessageOrigin, TenantDatabaseManager};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct SendEmail {
    tenants: Arc<TenantDatabaseManager>,
    delivery: Arc<DeliveryClient>,
}

impl SendEmail {
    pub fn new(tenants: Arc<TenantDatabaseManager>, delivery: Arc<DeliveryClient>) -> Self {
        Self { tenants, delivery }
    }
}

#[async_trait]
impl ActionExecutor for SendEmail {
    async fn execute(&self, params: &Value, ctx: &ActionContext<'_>) -> Result<Value, ActionError> {
        let to = addresses(params.get("to"), "to")?;
        if to.is_empty() {
            return Err(ActionError::invalid("missing 'to'"));
        }
        let cc = addresses(params.get("cc"), "cc")?;
        let subject = required_str(params, "subject")?;
        let body = optional_str(params, "body").unwrap_or_default();

        let message = json!({
            "to": to,
            "cc": cc,
            "subject": subject,
            "body": body,
        });

        let origin = MessageOrigin {
            execution_id: ctx.execution_id,
            node_id: ctx.node_id,
        };
        let outbox = self.tenants.outbox(ctx.tenant_id).await?;
        let message_id = outbox
            .enqueue("email", &to.join(","), &message, Some(origin), ctx.now)
            .await?;

        let delivery = match self.delivery.deliver("email", &message).await {
            Ok(delivery) => delivery,
            Err(err) => {
                outbox.mark(&message_id, "failed", ctx.now).await?;
                return Err(err);
            }
        };
        if delivery == Delivery::Sent {
            outbox.mark(&message_id, "sent", ctx.now).await?;
        }

        tracing::info!(
            "📧 Email '{}' for {} recipient(s) {} (execution {})",
            subject,
            to.len(),
            delivery.as_str(),
            ctx.execution_id
        );

        Ok(json!({
            "message_id": message_id,
            "recipients": to,
            "status": delivery.as_str(),
        }))
    }
}

/// Accepts a single address, a comma-separated list, or an array
fn addresses(value: Option<&Value>, key: &str) -> Result<Vec<String>, ActionError> {
    let raw: Vec<String> = match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(s)) => s.split(',').map(|part| part.trim().to_string()).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(|s| s.trim().to_string())
                    .ok_or_else(|| ActionError::invalid(format!("'{key}' entries must be strings")))
            })
            .collect::<Result<_, _>>()?,
        Some(_) => return Err(ActionError::invalid(format!("'{key}' must be a string or list"))),
    };

    let addresses: Vec<String> = raw.into_iter().filter(|s| !s.is_empty()).collect();
    for address in &addresses {
        let valid = address
            .split_once('@')
            .map(|(local, domain)| !local.is_empty() && domain.contains('.'))
            .unwrap_or(false);
        if !valid {
            return Err(ActionError::invalid(format!("invalid email address '{address}'")));
        }
    }
    Ok(addresses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::testing::ctx;
    use crate::workflow::types::ExecutionContext;

    fn action() -> (SendEmail, Arc<TenantDatabaseManager>) {
        let tenants = Arc::new(TenantDatabaseManager::in_memory());
        let action = SendEmail::new(Arc::clone(&tenants), Arc::new(DeliveryClient::disabled()));
        (action, tenants)
    }

    #[tokio::test]
    async fn queues_message_in_tenant_outbox() {
        let (action, tenants) = action();
        let context = ExecutionContext::default();
        let output = action
            .execute(
                &json!({ "to": "ana@example.com, bo@example.com", "subject": "Welcome", "body": "Hi" }),
                &ctx(&context),
            )
            .await
            .unwrap();

        assert_eq!(output["status"], "queued");
        assert_eq!(output["recipients"], json!(["ana@example.com", "bo@example.com"]));

        let queued = tenants.outbox("acme").await.unwrap().list("email").await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].recipient, "ana@example.com,bo@example.com");
        assert_eq!(queued[0].execution_id.as_deref(), Some("ex-1"));
    }

    #[tokio::test]
    async fn retried_attempts_reuse_the_outbox_row() {
        let tenants = Arc::new(TenantDatabaseManager::in_memory());
        let unreachable = DeliveryClient::new(
            Some("http://127.0.0.1:1/deliver".into()),
            std::time::Duration::from_millis(500),
        )
        .unwrap();
        let action = SendEmail::new(Arc::clone(&tenants), Arc::new(unreachable));
        let context = ExecutionContext::default();
        let params = json!({ "to": "ana@example.com", "subject": "Welcome" });

        for _ in 0..3 {
            let err = action.execute(&params, &ctx(&context)).await.unwrap_err();
            assert!(matches!(err, ActionError::Failed(_)), "{err}");
        }

        let outbox = tenants.outbox("acme").await.unwrap();
        let messages = outbox.list("email").await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].status, "failed");
        assert_eq!(messages[0].node_id.as_deref(), Some("node-1"));

        // A later attempt that only queues rewrites the same row
        let queued = SendEmail::new(Arc::clone(&tenants), Arc::new(DeliveryClient::disabled()));
        let output = queued
            .execute(&json!({ "to": "ana@example.com", "subject": "Welcome back" }), &ctx(&context))
            .await
            .unwrap();
        let messages = outbox.list("email").await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(output["message_id"], json!(messages[0].id));
        assert_eq!(messages[0].status, "queued");
        assert_eq!(messages[0].payload["subject"], json!("Welcome back"));
    }

    #[tokio::test]
    async fn bad_recipients_are_not_retryable() {
        let (action, _) = action();
        let context = ExecutionContext::default();
        for params in [
            json!({ "subject": "x" }),
            json!({ "to": "not-an-address", "subject": "x" }),
            json!({ "to": ["ana@example.com", 5], "subject": "x" }),
            json!({ "to": "ana@example.com" }),
        ] {
            let err = action.execute(&params, &ctx(&context)).await.unwrap_err();
            assert!(matches!(err, ActionError::InvalidParams(_)), "{params}");
        }
    }
}
