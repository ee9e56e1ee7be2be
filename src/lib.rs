/// hrflow: durable node-graph workflow engine for multi-tenant HR/CRM processes
///
/// Workflows are graphs of trigger, action, condition and wait nodes. Executions
/// are persisted after every node, suspend as data while waiting, and are
/// advanced by a pool of workers claiming them from SQLite.

pub mod config;

// Error taxonomy for node and action failures
pub mod error;

// Workflow definitions, storage and the hot-reload registry
pub mod workflow;

// Engine database: executions, logs, schedules
pub mod storage;

// Per-tenant record and outbox databases
pub mod tenant;

// Built-in action executors
pub mod actions;

// Resolver, node executors, engine, workers and scheduler
pub mod runtime;

pub mod api;

pub mod server;

pub use error::{ActionError, NodeError};
pub use runtime::{ExecutionEngine, ExecutionResult};
pub use server::start_server;
pub use workflow::{ExecutionContext, Node, NodeType, TriggerSpec, Workflow};
