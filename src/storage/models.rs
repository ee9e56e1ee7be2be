//! Persisted execution records

use crate::workflow::types::{ExecutionContext, Workflow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a workflow execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Waiting,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// No transition leaves a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "waiting" => Ok(Self::Waiting),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(anyhow::anyhow!("Unknown execution status: {}", other)),
        }
    }
}

/// Outcome of one node attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    Retrying,
    Failed,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Retrying => "retrying",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for LogStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "retrying" => Ok(Self::Retrying),
            "failed" => Ok(Self::Failed),
            other => Err(anyhow::anyhow!("Unknown log status: {}", other)),
        }
    }
}

/// One run of a workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowExecution {
    pub id: String,
    pub workflow_id: String,
    pub tenant_id: String,
    pub status: ExecutionStatus,
    pub current_node_id: Option<String>,
    pub context: ExecutionContext,
    /// Wake-up time while waiting; "not before" time for a delayed retry
    pub resume_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Claim token; engine writes only land while it still matches
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only record of a node attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowLog {
    pub id: i64,
    pub execution_id: String,
    pub node_id: String,
    pub attempt_number: u32,
    pub status: LogStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Log row before insertion
#[derive(Debug, Clone)]
pub struct NewLog {
    pub execution_id: String,
    pub node_id: String,
    pub attempt_number: u32,
    pub status: LogStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Cron schedule of a workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowSchedule {
    pub workflow_id: String,
    pub cron_expression: String,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

/// Request to start a new execution
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub workflow_id: String,
    pub tenant_id: String,
    pub trigger_data: Map<String, Value>,
    pub variables: Map<String, Value>,
}

impl NewExecution {
    /// Execution of `workflow` with its default variables, overridden by `variables`
    pub fn for_workflow(
        workflow: &Workflow,
        trigger_data: Map<String, Value>,
        variables: Map<String, Value>,
    ) -> Self {
        let mut merged = workflow.variables.clone();
        merged.extend(variables);
        Self {
            workflow_id: workflow.id.clone(),
            tenant_id: workflow.tenant_id.clone(),
            trigger_data,
            variables: merged,
        }
    }
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> anyhow::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| anyhow::anyhow!("Timestamp out of range: {}", millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_strings_round_trip() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Waiting,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<ExecutionStatus>().unwrap(), status);
        }
        assert!("paused".parse::<ExecutionStatus>().is_err());
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(!ExecutionStatus::Waiting.is_terminal());
    }

    #[test]
    fn trigger_variables_override_workflow_defaults() {
        let workflow: Workflow = serde_json::from_value(json!({
            "id": "wf",
            "name": "wf",
            "variables": { "escalate_to": "hr@example.com", "threshold": 3 },
            "nodes": [{ "id": "t", "type": "trigger" }]
        }))
        .unwrap();

        let mut vars = Map::new();
        vars.insert("threshold".into(), json!(5));
        let new = NewExecution::for_workflow(&workflow, Map::new(), vars);

        assert_eq!(new.variables["escalate_to"], json!("hr@example.com"));
        assert_eq!(new.variables["threshold"], json!(5));
    }
}
