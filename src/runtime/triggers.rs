//! Time-based triggers evaluated by the scheduler
//!
//! A trigger inspects tenant data and reports matches; each match carries a
//! dedupe key so the scheduler starts at most one execution per match no matter
//! how often the trigger is evaluated.

use crate::tenant::TenantDatabaseManager;
use crate::workflow::types::{TriggerSpec, Workflow};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// One reason to start an execution
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerMatch {
    /// Unique per workflow; a key that already fired is ignored
    pub dedupe_key: String,
    pub trigger_data: Map<String, Value>,
}

#[async_trait]
pub trait TimeTrigger: Send + Sync {
    fn name(&self) -> &'static str;

    fn handles(&self, trigger: &TriggerSpec) -> bool;

    async fn evaluate(&self, workflow: &Workflow, now: DateTime<Utc>) -> Result<Vec<TriggerMatch>>;
}

/// Fires for records whose date field falls within `[today, today + days_before]`
pub struct ContractExpiryTrigger {
    tenants: Arc<TenantDatabaseManager>,
}

impl ContractExpiryTrigger {
    pub fn new(tenants: Arc<TenantDatabaseManager>) -> Self {
        Self { tenants }
    }
}

#[async_trait]
impl TimeTrigger for ContractExpiryTrigger {
    fn name(&self) -> &'static str {
        "contract_expiring"
    }

    fn handles(&self, trigger: &TriggerSpec) -> bool {
        matches!(trigger, TriggerSpec::ContractExpiring { .. })
    }

    async fn evaluate(&self, workflow: &Workflow, now: DateTime<Utc>) -> Result<Vec<TriggerMatch>> {
        let TriggerSpec::ContractExpiring {
            days_before,
            collection,
            date_field,
        } = &workflow.trigger
        else {
            return Ok(Vec::new());
        };

        let today = now.date_naive();
        let horizon = today + Duration::days(i64::from(*days_before));
        let records = self
            .tenants
            .records(&workflow.tenant_id)
            .await?
            .in_date_range(collection, date_field, &today.to_string(), &horizon.to_string())
            .await?;

        let mut matches = Vec::with_capacity(records.len());
        for record in records {
            let Some(record_id) = record.get("id").and_then(Value::as_str).map(str::to_string) else {
                continue;
            };
            let Some(end_date) = field_date(&record, date_field) else {
                tracing::debug!("⏭️ Record {} has no parsable {}", record_id, date_field);
                continue;
            };

            let data = json!({
                "record": record,
                "record_id": record_id,
                "collection": collection,
                "end_date": end_date.to_string(),
                "days_remaining": (end_date - today).num_days(),
            });
            matches.push(TriggerMatch {
                dedupe_key: format!("{record_id}:{end_date}"),
                trigger_data: data.as_object().cloned().unwrap_or_default(),
            });
        }

        tracing::debug!(
            "📅 {} contract(s) of workflow {} expire by {}",
            matches.len(),
            workflow.id,
            horizon
        );
        Ok(matches)
    }
}

/// Date prefix (`YYYY-MM-DD`) of a possibly dotted field
fn field_date(record: &Value, field: &str) -> Option<NaiveDate> {
    let value = field
        .split('.')
        .try_fold(record, |current, key| current.get(key))?
        .as_str()?;
    NaiveDate::parse_from_str(value.get(..10)?, "%Y-%m-%d").ok()
}
