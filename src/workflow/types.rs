//! Core workflow type definitions
//!
//! Workflows are stored as JSON in SQLite and compiled into petgraph graphs for
//! validation. Edges live on the nodes themselves (`next_node_id` and the two
//! condition branches), so a definition is a flat list of nodes plus a trigger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A complete workflow definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    /// Unique workflow identifier (e.g., "wf-contract-renewal")
    pub id: String,
    /// Owning tenant; selects the isolated record database actions write to
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
    /// Human-readable workflow name
    pub name: String,
    /// How new executions of this workflow come into existence
    #[serde(default)]
    pub trigger: TriggerSpec,
    /// Default variables copied into every new execution
    #[serde(default)]
    pub variables: Map<String, Value>,
    /// Nodes of the graph; exactly one must be a trigger node
    pub nodes: Vec<Node>,
}

pub(crate) fn default_tenant() -> String {
    "default".to_string()
}

impl Workflow {
    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == node_id)
    }

    /// All `(from, to)` pairs implied by node references
    pub fn edges(&self) -> Vec<(&str, &str)> {
        self.nodes
            .iter()
            .flat_map(|node| {
                node.successors()
                    .into_iter()
                    .map(move |target| (node.id.as_str(), target))
            })
            .collect()
    }
}

/// A single node in the workflow graph
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    /// Unique node identifier within the workflow (e.g., "n1", "check-priority")
    pub id: String,
    /// The type of node which determines execution behavior
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Node-specific configuration
    #[serde(default)]
    pub config: Value,
    /// Successor for trigger, action and wait nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_node_id: Option<String>,
    /// Condition successor when the comparison holds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub true_branch: Option<String>,
    /// Condition successor when the comparison does not hold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub false_branch: Option<String>,
}

impl Node {
    pub fn successors(&self) -> Vec<&str> {
        [&self.next_node_id, &self.true_branch, &self.false_branch]
            .into_iter()
            .filter_map(|target| target.as_deref())
            .collect()
    }

    /// String config entry, if present
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }
}

/// Available node types
///
/// - Trigger: entry point, seeds trigger data
/// - Action: dispatches to an action executor by `action_type`
/// - Condition: compares a resolved field and picks a branch
/// - Wait: suspends the execution until a time or a field becomes truthy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Expected config: { "data": { ... } } (optional default trigger data)
    Trigger,
    /// Expected config: { "action_type": "send_email", "params": { ... }, "save_as": "var" }
    Action,
    /// Expected config: { "field": "{{trigger.priority}}", "operator": "equals", "value": "high" }
    Condition,
    /// Expected config: { "duration": "24h" } | { "until": "..." } | { "until_field": "..." }
    Wait,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NodeType::Trigger => "trigger",
            NodeType::Action => "action",
            NodeType::Condition => "condition",
            NodeType::Wait => "wait",
        };
        f.write_str(name)
    }
}

/// How executions of a workflow are started
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerSpec {
    /// Started from the API or UI
    #[default]
    Manual,
    /// Started by `/webhook/{workflow_id}/{path}`
    Webhook { path: String },
    /// Started by the scheduler from a cron expression
    Schedule { cron: String },
    /// Started once per contract whose end date falls within the window
    ContractExpiring {
        days_before: u32,
        #[serde(default = "default_contract_collection")]
        collection: String,
        #[serde(default = "default_contract_date_field")]
        date_field: String,
    },
}

impl TriggerSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            TriggerSpec::Manual => "manual",
            TriggerSpec::Webhook { .. } => "webhook",
            TriggerSpec::Schedule { .. } => "schedule",
            TriggerSpec::ContractExpiring { .. } => "contract_expiring",
        }
    }
}

fn default_contract_collection() -> String {
    "contracts".to_string()
}

fn default_contract_date_field() -> String {
    "end_date".to_string()
}

/// Runtime state carried by an execution between nodes
///
/// Persisted as JSON after every node, so an execution can be resumed by a
/// different process days later.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionContext {
    /// Data the execution was started with
    #[serde(default)]
    pub trigger_data: Map<String, Value>,
    /// Workflow variables (defaults plus values saved by actions)
    #[serde(default)]
    pub variables: Map<String, Value>,
    /// Output of each executed node, keyed by node id
    #[serde(default)]
    pub node_outputs: BTreeMap<String, Value>,
    /// Engine bookkeeping: ids, timestamps, attempt counters, wait deadlines
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

const ATTEMPTS_KEY: &str = "attempts";
const WAIT_UNTIL_KEY: &str = "wait_until";

impl ExecutionContext {
    /// Create the context of a freshly triggered execution
    pub fn from_trigger(
        workflow_id: &str,
        tenant_id: &str,
        trigger_data: Map<String, Value>,
        variables: Map<String, Value>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let mut metadata = Map::new();
        metadata.insert("workflow_id".to_string(), Value::String(workflow_id.to_string()));
        metadata.insert("tenant_id".to_string(), Value::String(tenant_id.to_string()));
        metadata.insert("started_at".to_string(), Value::String(started_at.to_rfc3339()));

        Self {
            trigger_data,
            variables,
            node_outputs: BTreeMap::new(),
            metadata,
        }
    }

    pub fn record_output(&mut self, node_id: &str, output: Value) {
        self.node_outputs.insert(node_id.to_string(), output);
    }

    /// Failed attempts recorded so far for a node
    pub fn attempts(&self, node_id: &str) -> u32 {
        self.metadata
            .get(ATTEMPTS_KEY)
            .and_then(|attempts| attempts.get(node_id))
            .and_then(Value::as_u64)
            .map(|n| n as u32)
            .unwrap_or(0)
    }

    pub fn set_attempts(&mut self, node_id: &str, attempts: u32) {
        self.set_metadata_entry(ATTEMPTS_KEY, node_id, Value::from(attempts));
    }

    /// Deadline a wait node suspended until, if it is currently waiting
    pub fn wait_deadline(&self, node_id: &str) -> Option<DateTime<Utc>> {
        self.metadata
            .get(WAIT_UNTIL_KEY)
            .and_then(|waits| waits.get(node_id))
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn set_wait_deadline(&mut self, node_id: &str, deadline: DateTime<Utc>) {
        self.set_metadata_entry(WAIT_UNTIL_KEY, node_id, Value::String(deadline.to_rfc3339()));
    }

    pub fn clear_wait_deadline(&mut self, node_id: &str) {
        if let Some(Value::Object(waits)) = self.metadata.get_mut(WAIT_UNTIL_KEY) {
            waits.remove(node_id);
        }
    }

    fn set_metadata_entry(&mut self, section: &str, node_id: &str, value: Value) {
        let mut entries = match self.metadata.remove(section) {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        entries.insert(node_id.to_string(), value);
        self.metadata.insert(section.to_string(), Value::Object(entries));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn workflow_deserializes_from_definition_json() {
        let workflow: Workflow = serde_json::from_value(json!({
            "id": "wf-1",
            "name": "Onboarding",
            "trigger": { "type": "schedule", "cron": "0 0 9 * * *" },
            "nodes": [
                { "id": "start", "type": "trigger", "next_node_id": "check" },
                { "id": "check", "type": "condition",
                  "config": { "field": "{{trigger.priority}}", "operator": "equals", "value": "high" },
                  "true_branch": "mail" },
                { "id": "mail", "type": "action", "config": { "action_type": "send_email" } }
            ]
        }))
        .unwrap();

        assert_eq!(workflow.tenant_id, "default");
        assert_eq!(workflow.trigger, TriggerSpec::Schedule { cron: "0 0 9 * * *".into() });
        assert_eq!(workflow.node("check").unwrap().node_type, NodeType::Condition);
        assert_eq!(workflow.edges(), vec![("start", "check"), ("check", "mail")]);
    }

    #[test]
    fn contract_trigger_fills_defaults() {
        let spec: TriggerSpec =
            serde_json::from_value(json!({ "type": "contract_expiring", "days_before": 30 })).unwrap();
        assert_eq!(
            spec,
            TriggerSpec::ContractExpiring {
                days_before: 30,
                collection: "contracts".into(),
                date_field: "end_date".into(),
            }
        );
    }

    #[test]
    fn context_bookkeeping_survives_serialization() {
        let started = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let mut trigger = Map::new();
        trigger.insert("email".into(), json!("ana@example.com"));
        let mut ctx = ExecutionContext::from_trigger("wf-1", "acme", trigger, Map::new(), started);

        ctx.set_attempts("send", 2);
        ctx.set_wait_deadline("pause", started + chrono::Duration::hours(24));
        ctx.record_output("send", json!({ "message_id": "m-1" }));

        let restored: ExecutionContext =
            serde_json::from_str(&serde_json::to_string(&ctx).unwrap()).unwrap();
        assert_eq!(restored, ctx);
        assert_eq!(restored.attempts("send"), 2);
        assert_eq!(restored.attempts("other"), 0);
        assert_eq!(
            restored.wait_deadline("pause"),
            Some(started + chrono::Duration::hours(24))
        );

        let mut cleared = restored;
        cleared.clear_wait_deadline("pause");
        assert_eq!(cleared.wait_deadline("pause"), None);
    }
}
