/// Hot-reload workflow registry using ArcSwap
///
/// Provides lock-free reads of the published workflows. Each update swaps the
/// whole map, so executions holding an `Arc<CompiledWorkflow>` keep running on
/// the definition they started with while new claims see the new one.

use crate::runtime::scheduler::parse_cron;
use crate::tenant::validate_tenant_id;
use crate::workflow::{
    storage::WorkflowStorage,
    types::{NodeType, TriggerSpec, Workflow},
};
use anyhow::Result;
use arc_swap::ArcSwap;
use petgraph::{algo::is_cyclic_directed, graphmap::DiGraphMap, visit::Dfs};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use thiserror::Error;

/// Why a workflow definition was rejected
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("workflow id must not be empty")]
    EmptyId,
    #[error("invalid tenant id '{0}'")]
    InvalidTenant(String),
    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),
    #[error("workflow must have exactly one trigger node, found {0}")]
    TriggerCount(usize),
    #[error("node '{node}' references unknown node '{target}'")]
    UnknownReference { node: String, target: String },
    #[error("node '{0}' may not use condition branches")]
    UnexpectedBranch(String),
    #[error("node '{0}' may not reference the trigger node")]
    TriggerReferenced(String),
    #[error("workflow graph contains a cycle")]
    Cycle,
    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),
}

/// Compiled workflow with execution metadata
#[derive(Debug, Clone)]
pub struct CompiledWorkflow {
    pub workflow: Workflow,
    /// Where every new execution starts
    pub trigger_node_id: String,
}

/// Check a definition and extract its entry point
///
/// Nodes unreachable from the trigger are allowed but reported.
pub fn validate_workflow(workflow: &Workflow) -> Result<CompiledWorkflow, ValidationError> {
    if workflow.id.trim().is_empty() {
        return Err(ValidationError::EmptyId);
    }
    validate_tenant_id(&workflow.tenant_id)
        .map_err(|_| ValidationError::InvalidTenant(workflow.tenant_id.clone()))?;

    let mut ids = HashSet::new();
    for node in &workflow.nodes {
        if !ids.insert(node.id.as_str()) {
            return Err(ValidationError::DuplicateNode(node.id.clone()));
        }
    }

    let triggers: Vec<&str> = workflow
        .nodes
        .iter()
        .filter(|node| node.node_type == NodeType::Trigger)
        .map(|node| node.id.as_str())
        .collect();
    let [trigger_node_id] = triggers.as_slice() else {
        return Err(ValidationError::TriggerCount(triggers.len()));
    };

    for node in &workflow.nodes {
        if node.node_type != NodeType::Condition
            && (node.true_branch.is_some() || node.false_branch.is_some())
        {
            return Err(ValidationError::UnexpectedBranch(node.id.clone()));
        }
        for target in node.successors() {
            if !ids.contains(target) {
                return Err(ValidationError::UnknownReference {
                    node: node.id.clone(),
                    target: target.to_string(),
                });
            }
            if target == *trigger_node_id {
                return Err(ValidationError::TriggerReferenced(node.id.clone()));
            }
        }
    }

    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for node in &workflow.nodes {
        graph.add_node(node.id.as_str());
    }
    for (from, to) in workflow.edges() {
        graph.add_edge(from, to, ());
    }
    if is_cyclic_directed(&graph) {
        return Err(ValidationError::Cycle);
    }

    let mut reachable = HashSet::new();
    let mut dfs = Dfs::new(&graph, *trigger_node_id);
    while let Some(id) = dfs.next(&graph) {
        reachable.insert(id);
    }
    for node in &workflow.nodes {
        if !reachable.contains(node.id.as_str()) {
            tracing::warn!(
                "⚠️ Node '{}' of workflow '{}' is unreachable from the trigger",
                node.id,
                workflow.id
            );
        }
    }

    match &workflow.trigger {
        TriggerSpec::Webhook { path } if path.trim_matches('/').is_empty() => {
            return Err(ValidationError::InvalidTrigger("webhook path is empty".into()));
        }
        TriggerSpec::Schedule { cron } => {
            parse_cron(cron).map_err(|e| ValidationError::InvalidTrigger(e.to_string()))?;
        }
        TriggerSpec::ContractExpiring {
            collection,
            date_field,
            ..
        } => {
            crate::tenant::records::validate_name(collection)
                .and_then(|_| crate::tenant::records::validate_field(date_field))
                .map_err(|e| ValidationError::InvalidTrigger(e.to_string()))?;
        }
        _ => {}
    }

    Ok(CompiledWorkflow {
        workflow: workflow.clone(),
        trigger_node_id: trigger_node_id.to_string(),
    })
}

/// Lock-free workflow registry for hot-reload capabilities
#[derive(Debug)]
pub struct WorkflowRegistry {
    /// Key: workflow_id
    workflows: ArcSwap<HashMap<String, Arc<CompiledWorkflow>>>,
    storage: WorkflowStorage,
}

impl WorkflowRegistry {
    pub fn new(storage: WorkflowStorage) -> Self {
        Self {
            workflows: ArcSwap::new(Arc::new(HashMap::new())),
            storage,
        }
    }

    pub fn storage(&self) -> &WorkflowStorage {
        &self.storage
    }

    /// Load every stored workflow; invalid definitions are skipped
    pub async fn init_from_storage(&self) -> Result<()> {
        let stored_workflows = self.storage.load_all_workflows().await?;

        let mut compiled = HashMap::with_capacity(stored_workflows.len());
        for (id, workflow) in stored_workflows {
            match validate_workflow(&workflow) {
                Ok(workflow) => {
                    compiled.insert(id, Arc::new(workflow));
                }
                Err(e) => tracing::warn!("⚠️ Not loading invalid workflow {}: {}", id, e),
            }
        }

        self.workflows.store(Arc::new(compiled));
        tracing::info!(
            "📚 Initialized workflow registry with {} workflows",
            self.workflows.load().len()
        );
        Ok(())
    }

    /// Validate, persist and publish a workflow
    pub async fn register(&self, workflow: Workflow) -> Result<Arc<CompiledWorkflow>> {
        let compiled = Arc::new(validate_workflow(&workflow)?);
        self.storage.save_workflow(&workflow).await?;
        self.publish(Arc::clone(&compiled));
        tracing::info!("📦 Registered workflow: {}", workflow.id);
        Ok(compiled)
    }

    fn publish(&self, compiled: Arc<CompiledWorkflow>) {
        self.workflows.rcu(|current| {
            let mut next = (**current).clone();
            next.insert(compiled.workflow.id.clone(), Arc::clone(&compiled));
            next
        });
    }

    /// Get a workflow by ID (lock-free read)
    pub fn get_workflow(&self, workflow_id: &str) -> Option<Arc<CompiledWorkflow>> {
        self.workflows.load().get(workflow_id).cloned()
    }

    /// Snapshot of all published workflows (used by the scheduler)
    pub fn get_all_workflows(&self) -> Vec<Arc<CompiledWorkflow>> {
        self.workflows.load().values().cloned().collect()
    }

    /// Unpublish and delete a workflow; returns whether it existed in storage
    pub async fn remove_workflow(&self, workflow_id: &str) -> Result<bool> {
        let deleted = self.storage.delete_workflow(workflow_id).await?;
        self.workflows.rcu(|current| {
            let mut next = (**current).clone();
            next.remove(workflow_id);
            next
        });
        if deleted {
            tracing::info!("🗑️ Removed workflow: {}", workflow_id);
        }
        Ok(deleted)
    }
}
