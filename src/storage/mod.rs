//! Engine database: executions, node logs, schedules and trigger firings

pub mod database;
pub mod executions;
pub mod models;

pub use database::{connect, connect_in_memory};
pub use executions::ExecutionStore;
pub use models::{
    ExecutionStatus, LogStatus, NewExecution, NewLog, WorkflowExecution, WorkflowLog,
    WorkflowSchedule,
};
