/// Workflow Management Layer
///
/// - Type definitions (Workflow, Node, TriggerSpec, ExecutionContext)
/// - SQLite persistence with sqlx
/// - Lock-free hot-reload registry using ArcSwap, with definition validation

pub mod types;

pub mod storage;

pub mod registry;

pub use registry::{validate_workflow, CompiledWorkflow, ValidationError, WorkflowRegistry};
pub use types::{ExecutionContext, Node, NodeType, TriggerSpec, Workflow};
