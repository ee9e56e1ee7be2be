//! Node execution handlers
//!
//! Dispatches a node to the handler for its type and reports what the engine
//! should do next. Handlers never touch execution storage; the engine applies
//! the returned [`ExecutionResult`] to the persisted execution.

use crate::{
    actions::{ActionContext, ActionRegistry},
    error::NodeError,
    runtime::{condition, resolver::try_resolve_object, wait},
    storage::models::WorkflowExecution,
    workflow::types::{ExecutionContext, Node, NodeType},
};
use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Where the execution goes after a node succeeded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Follow `next_node_id`, completing when there is none
    Next,
    /// Follow the chosen condition branch, completing when it is absent
    Branch(Option<String>),
    /// Stay on this node until `resume_at`
    Suspend { resume_at: DateTime<Utc> },
}

/// Result of executing a single node
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Stored under `node_outputs[node_id]`
    pub output: Value,
    pub transition: Transition,
    /// Trigger data to seed when the execution started without any
    pub seed_trigger_data: Option<Map<String, Value>>,
    /// Variables to set (`save_as`)
    pub set_variables: Map<String, Value>,
}

impl ExecutionResult {
    pub fn next(output: Value) -> Self {
        Self::with_transition(output, Transition::Next)
    }

    pub fn branch(output: Value, target: Option<String>) -> Self {
        Self::with_transition(output, Transition::Branch(target))
    }

    pub fn suspend(output: Value, resume_at: DateTime<Utc>) -> Self {
        Self::with_transition(output, Transition::Suspend { resume_at })
    }

    fn with_transition(output: Value, transition: Transition) -> Self {
        Self {
            output,
            transition,
            seed_trigger_data: None,
            set_variables: Map::new(),
        }
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self.transition, Transition::Suspend { .. })
    }
}

/// Node executor that handles execution of the four node types
#[derive(Debug)]
pub struct NodeExecutor {
    actions: Arc<ActionRegistry>,
    wait_poll_interval: Duration,
}

impl NodeExecutor {
    pub fn new(actions: Arc<ActionRegistry>) -> Self {
        Self {
            actions,
            wait_poll_interval: Duration::hours(1),
        }
    }

    /// Default poll interval for `until_field` waits without their own
    pub fn with_wait_poll_interval(mut self, interval: Duration) -> Self {
        self.wait_poll_interval = interval;
        self
    }

    /// Execute one node of `execution` at `now`
    pub async fn execute_node(
        &self,
        node: &Node,
        execution: &WorkflowExecution,
        now: DateTime<Utc>,
    ) -> Result<ExecutionResult, NodeError> {
        tracing::info!(
            "🚀 Starting node execution: {} (type: {}, execution: {})",
            node.id,
            node.node_type,
            execution.id
        );
        let start_time = std::time::Instant::now();

        let result = match node.node_type {
            NodeType::Trigger => Ok(execute_trigger(node, &execution.context)),
            NodeType::Action => self.execute_action(node, execution, now).await,
            NodeType::Condition => condition::evaluate(node, &execution.context),
            NodeType::Wait => wait::evaluate(node, &execution.context, now, self.wait_poll_interval),
        };

        let elapsed = start_time.elapsed();
        match &result {
            Ok(outcome) if outcome.is_suspended() => {
                tracing::info!("⏸️ Node {} suspended after {:?}", node.id, elapsed)
            }
            Ok(_) => tracing::info!("✅ Node execution completed: {} in {:?}", node.id, elapsed),
            Err(e) => tracing::warn!("❌ Node execution failed: {} in {:?}: {}", node.id, elapsed, e),
        }
        result
    }

    /// Resolve params, run the registered executor, optionally save its output
    async fn execute_action(
        &self,
        node: &Node,
        execution: &WorkflowExecution,
        now: DateTime<Utc>,
    ) -> Result<ExecutionResult, NodeError> {
        let action_type = node.config_str("action_type").ok_or_else(|| {
            NodeError::configuration(format!("action node '{}' requires 'action_type'", node.id))
        })?;
        let executor = self.actions.get(action_type).ok_or_else(|| {
            NodeError::configuration(format!("no executor registered for action type '{action_type}'"))
        })?;

        let params = match node.config.get("params") {
            Some(template) => try_resolve_object(template, &execution.context)?,
            None => Value::Object(Map::new()),
        };
        tracing::debug!("📥 {} params: {}", action_type, params);

        let ctx = ActionContext {
            execution_id: &execution.id,
            workflow_id: &execution.workflow_id,
            tenant_id: &execution.tenant_id,
            node_id: &node.id,
            context: &execution.context,
            now,
        };
        let output = executor.execute(&params, &ctx).await?;

        let mut result = ExecutionResult::next(output);
        if let Some(variable) = node.config_str("save_as").filter(|v| !v.is_empty()) {
            result
                .set_variables
                .insert(variable.to_string(), result.output.clone());
        }
        Ok(result)
    }
}

/// Trigger nodes pass the trigger data through
///
/// A manual start without data picks up the node's configured `data`.
fn execute_trigger(node: &Node, context: &ExecutionContext) -> ExecutionResult {
    let configured = node.config.get("data").and_then(Value::as_object);
    match configured {
        Some(data) if context.trigger_data.is_empty() => {
            let mut result = ExecutionResult::next(Value::Object(data.clone()));
            result.seed_trigger_data = Some(data.clone());
            result
        }
        _ => ExecutionResult::next(Value::Object(context.trigger_data.clone())),
    }
}
