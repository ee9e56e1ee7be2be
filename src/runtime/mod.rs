/// Runtime execution layer
///
/// - `resolver`: `{{path}}` templates against an execution context
/// - `executor`, `condition`, `wait`: per-node-type handlers
/// - `engine`: advances claimed executions and persists every step
/// - `worker`: pool of tasks draining the pending queue
/// - `scheduler`, `triggers`: cron schedules, resumption and time-based triggers

pub mod clock;
pub mod condition;
pub mod engine;
pub mod executor;
pub mod resolver;
pub mod scheduler;
pub mod triggers;
pub mod wait;
pub mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{ExecutionEngine, RetryPolicy};
pub use executor::{ExecutionResult, NodeExecutor, Transition};
pub use scheduler::{Scheduler, SchedulerService};
pub use triggers::{ContractExpiryTrigger, TimeTrigger, TriggerMatch};
pub use worker::{drain, WorkerPool};
