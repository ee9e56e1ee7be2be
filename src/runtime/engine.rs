//! Execution engine
//!
//! Advances a claimed execution node by node until it completes, fails,
//! suspends on a wait, or schedules a retry. Every state change is persisted
//! through the lease-conditional [`ExecutionStore::save`], so an execution that
//! was cancelled or reclaimed while a node ran is never overwritten.

use crate::runtime::clock::Clock;
use crate::runtime::executor::{NodeExecutor, Transition};
use crate::storage::{ExecutionStatus, ExecutionStore, LogStatus, NewLog, WorkflowExecution};
use crate::workflow::registry::WorkflowRegistry;
use crate::workflow::types::NodeType;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::Arc;

/// `last_error` written by operator cancellation
pub const CANCELLED_BY_OPERATOR: &str = "cancelled by operator";

/// Retry policy for transient action failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: vec![
                Duration::seconds(1),
                Duration::seconds(5),
                Duration::seconds(15),
            ],
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following failed attempt `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if self.backoff.is_empty() {
            return Duration::zero();
        }
        let index = (attempt as usize).clamp(1, self.backoff.len()) - 1;
        self.backoff[index]
    }

    pub fn allows_another(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Workflow execution engine
#[derive(Debug)]
pub struct ExecutionEngine {
    store: ExecutionStore,
    registry: Arc<WorkflowRegistry>,
    executor: Arc<NodeExecutor>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    max_steps: u32,
}

impl ExecutionEngine {
    pub fn new(
        store: ExecutionStore,
        registry: Arc<WorkflowRegistry>,
        executor: Arc<NodeExecutor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            registry,
            executor,
            retry: RetryPolicy::default(),
            clock,
            max_steps: 1000,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn store(&self) -> &ExecutionStore {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Claim the oldest due pending execution and advance it
    pub async fn process_next(&self) -> Result<Option<WorkflowExecution>> {
        let Some(execution) = self.store.claim_next(self.clock.now()).await? else {
            return Ok(None);
        };
        tracing::debug!("📥 Claimed execution {} ({})", execution.id, execution.workflow_id);
        self.advance(execution).await.map(Some)
    }

    /// Process executions until nothing is claimable at the current time
    pub async fn run_until_idle(&self) -> Result<usize> {
        let mut processed = 0;
        while self.process_next().await?.is_some() {
            processed += 1;
        }
        Ok(processed)
    }

    /// Fail a non-terminal execution on behalf of an operator
    pub async fn cancel(&self, execution_id: &str) -> Result<bool> {
        let cancelled = self
            .store
            .cancel(execution_id, CANCELLED_BY_OPERATOR, self.clock.now())
            .await?;
        if cancelled {
            tracing::info!("🛑 Execution {} cancelled by operator", execution_id);
        }
        Ok(cancelled)
    }

    /// Advance a claimed (`running`) execution as far as it can go
    ///
    /// Returns the execution as last persisted. When the execution was
    /// cancelled or reclaimed underneath, the stored row is returned instead.
    pub async fn advance(&self, mut execution: WorkflowExecution) -> Result<WorkflowExecution> {
        let started = std::time::Instant::now();

        let Some(compiled) = self.registry.get_workflow(&execution.workflow_id) else {
            tracing::error!(
                "❌ Execution {} references unknown workflow {}",
                execution.id,
                execution.workflow_id
            );
            let message = format!("workflow '{}' not found", execution.workflow_id);
            return self.finish_failed(execution, message).await;
        };

        let mut steps = 0u32;
        loop {
            if self.store.get_status(&execution.id).await? != Some(ExecutionStatus::Running) {
                tracing::info!("🛑 Execution {} is no longer running, stopping", execution.id);
                return self.reload(execution).await;
            }

            if steps >= self.max_steps {
                let message = format!("exceeded {} steps in one pass", self.max_steps);
                return self.finish_failed(execution, message).await;
            }
            steps += 1;

            let node_id = execution
                .current_node_id
                .clone()
                .unwrap_or_else(|| compiled.trigger_node_id.clone());
            execution.current_node_id = Some(node_id.clone());

            let Some(node) = compiled.workflow.node(&node_id) else {
                let message = format!("node '{node_id}': configuration error: unknown node");
                return self.finish_failed(execution, message).await;
            };

            let now = self.clock.now();
            let attempt = execution.context.attempts(&node_id) + 1;
            tracing::info!(
                "📍 Step {}: executing node '{}' (type: {}, attempt {}) for execution {}",
                steps,
                node_id,
                node.node_type,
                attempt,
                execution.id
            );

            let result = match self.executor.execute_node(node, &execution, now).await {
                Ok(result) => result,
                Err(err) => {
                    execution.context.set_attempts(&node_id, attempt);
                    let message = format!("node '{node_id}': {err}");
                    let retry = node.node_type == NodeType::Action
                        && err.is_retryable()
                        && self.retry.allows_another(attempt);

                    let status = if retry { LogStatus::Retrying } else { LogStatus::Failed };
                    self.log(&execution, &node_id, attempt, status, None, Some(err.to_string()), now)
                        .await?;

                    if !retry {
                        tracing::error!(
                            "❌ Execution {} failed ({}): {}",
                            execution.id,
                            err.kind(),
                            message
                        );
                        return self.finish_failed(execution, message).await;
                    }

                    let delay = self.retry.delay_after(attempt);
                    tracing::warn!(
                        "🔁 Execution {} will retry node '{}' in {}ms (attempt {}/{})",
                        execution.id,
                        node_id,
                        delay.num_milliseconds(),
                        attempt + 1,
                        self.retry.max_attempts
                    );
                    execution.status = ExecutionStatus::Pending;
                    execution.resume_at = Some(now + delay);
                    execution.last_error = Some(message);
                    return self.persist_and_return(execution).await;
                }
            };

            self.log(
                &execution,
                &node_id,
                attempt,
                LogStatus::Success,
                Some(result.output.clone()),
                None,
                now,
            )
            .await?;

            let context = &mut execution.context;
            context.record_output(&node_id, result.output);
            if let Some(seed) = result.seed_trigger_data {
                context.trigger_data = seed;
            }
            context.variables.extend(result.set_variables);

            let next = match result.transition {
                Transition::Suspend { resume_at } => {
                    context.set_wait_deadline(&node_id, resume_at);
                    execution.status = ExecutionStatus::Waiting;
                    execution.resume_at = Some(resume_at);
                    tracing::info!(
                        "⏸️ Execution {} waiting on '{}' until {}",
                        execution.id,
                        node_id,
                        resume_at
                    );
                    return self.persist_and_return(execution).await;
                }
                Transition::Next => node.next_node_id.clone(),
                Transition::Branch(target) => target,
            };
            if node.node_type == NodeType::Wait {
                context.clear_wait_deadline(&node_id);
            }

            match next {
                Some(next_id) => {
                    execution.current_node_id = Some(next_id);
                    if !self.persist(&execution).await? {
                        return self.reload(execution).await;
                    }
                }
                None => {
                    execution.status = ExecutionStatus::Completed;
                    execution.resume_at = None;
                    tracing::info!(
                        "🎉 Execution {} of workflow '{}' completed in {:?}",
                        execution.id,
                        execution.workflow_id,
                        started.elapsed()
                    );
                    return self.persist_and_return(execution).await;
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn log(
        &self,
        execution: &WorkflowExecution,
        node_id: &str,
        attempt: u32,
        status: LogStatus,
        output: Option<Value>,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.store
            .append_log(NewLog {
                execution_id: execution.id.clone(),
                node_id: node_id.to_string(),
                attempt_number: attempt,
                status,
                output,
                error,
                timestamp,
            })
            .await?;
        Ok(())
    }

    async fn finish_failed(
        &self,
        mut execution: WorkflowExecution,
        message: String,
    ) -> Result<WorkflowExecution> {
        execution.status = ExecutionStatus::Failed;
        execution.resume_at = None;
        execution.last_error = Some(message);
        self.persist_and_return(execution).await
    }

    async fn persist(&self, execution: &WorkflowExecution) -> Result<bool> {
        let saved = self.store.save(execution, self.clock.now()).await?;
        if !saved {
            tracing::warn!("🔒 Lost claim on execution {}, discarding changes", execution.id);
        }
        Ok(saved)
    }

    async fn persist_and_return(&self, execution: WorkflowExecution) -> Result<WorkflowExecution> {
        if self.persist(&execution).await? {
            let mut saved = execution;
            if saved.status != ExecutionStatus::Running {
                saved.lease_id = None;
            }
            Ok(saved)
        } else {
            self.reload(execution).await
        }
    }

    async fn reload(&self, execution: WorkflowExecution) -> Result<WorkflowExecution> {
        Ok(self.store.get_execution(&execution.id).await?.unwrap_or(execution))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_follows_schedule_and_clamps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::seconds(1));
        assert_eq!(policy.delay_after(2), Duration::seconds(5));
        assert_eq!(policy.delay_after(3), Duration::seconds(15));
        assert_eq!(policy.delay_after(9), Duration::seconds(15));
        assert!(policy.allows_another(2));
        assert!(!policy.allows_another(3));
    }

    #[test]
    fn empty_backoff_retries_immediately() {
        let policy = RetryPolicy {
            max_attempts: 2,
            backoff: Vec::new(),
        };
        assert_eq!(policy.delay_after(1), Duration::zero());
    }
}
