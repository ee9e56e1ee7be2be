/// Background scheduler service
///
/// A single repeating tokio-cron-scheduler job runs the scheduler passes on a
/// fixed interval. Each pass is a set of conditional store updates, so running
/// it twice (or from two processes) never starts or resumes anything twice.

use crate::{
    runtime::{clock::Clock, triggers::TimeTrigger},
    storage::{ExecutionStore, NewExecution},
    workflow::{
        registry::WorkflowRegistry,
        types::{TriggerSpec, Workflow},
    },
};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Map};
use std::{str::FromStr, sync::Arc};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};

/// Parse a cron expression; 5-field expressions get a leading seconds field
pub fn parse_cron(expression: &str) -> Result<cron::Schedule> {
    let fields = expression.split_whitespace().count();
    let normalized = if fields == 5 {
        format!("0 {}", expression.trim())
    } else {
        expression.trim().to_string()
    };
    cron::Schedule::from_str(&normalized)
        .map_err(|e| anyhow::anyhow!("Invalid cron expression '{}': {}", expression, e))
}

/// First occurrence of `expression` strictly after `after`
pub fn next_cron_run(expression: &str, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    Ok(parse_cron(expression)?.after(&after).next())
}

/// What one scheduler tick did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    pub schedules_fired: usize,
    pub resumed: usize,
    pub triggered: usize,
    pub recovered: usize,
}

/// The scheduler passes, independent of how they are driven
#[derive(Clone)]
pub struct Scheduler {
    store: ExecutionStore,
    registry: Arc<WorkflowRegistry>,
    triggers: Arc<Vec<Arc<dyn TimeTrigger>>>,
    clock: Arc<dyn Clock>,
    stale_after: Duration,
}

impl Scheduler {
    pub fn new(
        store: ExecutionStore,
        registry: Arc<WorkflowRegistry>,
        triggers: Vec<Arc<dyn TimeTrigger>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            registry,
            triggers: Arc::new(triggers),
            clock,
            stale_after: Duration::minutes(15),
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Run every pass once; a failing pass is logged and skipped
    pub async fn run_once(&self) -> PassReport {
        let now = self.clock.now();
        let report = PassReport {
            schedules_fired: log_pass("due schedules", self.fire_due_schedules(now).await),
            resumed: log_pass("resume waiting", self.resume_waiting(now).await),
            triggered: log_pass("time triggers", self.fire_time_triggers(now).await),
            recovered: log_pass("stale claims", self.recover_stale(now).await),
        };
        if report != PassReport::default() {
            tracing::info!(
                "⏰ Scheduler pass: {} scheduled, {} resumed, {} triggered, {} recovered",
                report.schedules_fired,
                report.resumed,
                report.triggered,
                report.recovered
            );
        }
        report
    }

    /// Start one execution per due schedule and advance its `next_run`
    pub async fn fire_due_schedules(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut fired = 0;
        for schedule in self.store.due_schedules(now).await? {
            let Some(compiled) = self.registry.get_workflow(&schedule.workflow_id) else {
                tracing::warn!(
                    "⚠️ Schedule for unknown workflow {} skipped",
                    schedule.workflow_id
                );
                continue;
            };
            let next_run = match next_cron_run(&schedule.cron_expression, now) {
                Ok(Some(next_run)) => next_run,
                Ok(None) => {
                    tracing::warn!(
                        "⚠️ Schedule '{}' of {} has no upcoming run",
                        schedule.cron_expression,
                        schedule.workflow_id
                    );
                    continue;
                }
                Err(e) => {
                    tracing::warn!("⚠️ Schedule of {} skipped: {}", schedule.workflow_id, e);
                    continue;
                }
            };

            let scheduled_for = schedule.next_run.unwrap_or(now);
            let mut trigger_data = Map::new();
            trigger_data.insert("scheduled_for".into(), json!(scheduled_for.to_rfc3339()));
            trigger_data.insert("fired_at".into(), json!(now.to_rfc3339()));
            trigger_data.insert("cron".into(), json!(schedule.cron_expression));

            let new = NewExecution::for_workflow(&compiled.workflow, trigger_data, Map::new());
            if let Some(execution) = self.store.fire_schedule(&schedule, next_run, new, now).await? {
                tracing::info!(
                    "🔔 Schedule fired for {}: execution {} (next run {})",
                    schedule.workflow_id,
                    execution.id,
                    next_run
                );
                fired += 1;
            }
        }
        Ok(fired)
    }

    /// Re-admit waiting executions whose `resume_at` has passed
    pub async fn resume_waiting(&self, now: DateTime<Utc>) -> Result<usize> {
        let resumed = self.store.resume_due(now).await?;
        for id in &resumed {
            tracing::debug!("▶️ Resumed execution {}", id);
        }
        Ok(resumed.len())
    }

    /// Evaluate time-based triggers of all published workflows
    pub async fn fire_time_triggers(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut created = 0;
        for compiled in self.registry.get_all_workflows() {
            let workflow = &compiled.workflow;
            for trigger in self.triggers.iter().filter(|t| t.handles(&workflow.trigger)) {
                let matches = match trigger.evaluate(workflow, now).await {
                    Ok(matches) => matches,
                    Err(e) => {
                        tracing::warn!(
                            "⚠️ Trigger {} failed for workflow {}: {}",
                            trigger.name(),
                            workflow.id,
                            e
                        );
                        continue;
                    }
                };

                for found in matches {
                    let new = NewExecution::for_workflow(workflow, found.trigger_data, Map::new());
                    if let Some(execution) = self
                        .store
                        .create_execution_once(&found.dedupe_key, new, now)
                        .await?
                    {
                        tracing::info!(
                            "🔔 {} fired for {} ({}): execution {}",
                            trigger.name(),
                            workflow.id,
                            found.dedupe_key,
                            execution.id
                        );
                        created += 1;
                    }
                }
            }
        }
        Ok(created)
    }

    /// Return abandoned `running` executions to the queue
    pub async fn recover_stale(&self, now: DateTime<Utc>) -> Result<usize> {
        let recovered = self.store.requeue_stale(now - self.stale_after, now).await?;
        for id in &recovered {
            tracing::warn!("🩹 Recovered stale execution {}", id);
        }
        Ok(recovered.len())
    }

    /// Make the stored schedule match the workflow's trigger
    pub async fn sync_workflow_schedule(&self, workflow: &Workflow) -> Result<()> {
        match &workflow.trigger {
            TriggerSpec::Schedule { cron } => {
                let next_run = next_cron_run(cron, self.clock.now())?;
                self.store.upsert_schedule(&workflow.id, cron, next_run).await?;
                tracing::info!("📅 Schedule '{}' synced for workflow {}", cron, workflow.id);
            }
            _ => {
                self.remove_workflow_schedule(&workflow.id).await?;
            }
        }
        Ok(())
    }

    pub async fn remove_workflow_schedule(&self, workflow_id: &str) -> Result<bool> {
        let removed = self.store.delete_schedule(workflow_id).await?;
        if removed {
            tracing::info!("🗑️ Removed schedule of workflow {}", workflow_id);
        }
        Ok(removed)
    }

    /// Sync schedules of every published workflow (startup)
    pub async fn sync_all_schedules(&self) -> Result<usize> {
        let workflows = self.registry.get_all_workflows();
        for compiled in &workflows {
            self.sync_workflow_schedule(&compiled.workflow).await?;
        }
        Ok(workflows.len())
    }
}

fn log_pass(name: &str, result: Result<usize>) -> usize {
    result.unwrap_or_else(|e| {
        tracing::error!("❌ Scheduler pass '{}' failed: {}", name, e);
        0
    })
}

/// Drives [`Scheduler::run_once`] from a repeating tokio-cron-scheduler job
pub struct SchedulerService {
    scheduler: Arc<RwLock<JobScheduler>>,
    passes: Scheduler,
    interval: std::time::Duration,
}

impl SchedulerService {
    pub async fn new(passes: Scheduler, interval: std::time::Duration) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            passes,
            interval,
        })
    }

    /// Sync schedules, run one pass right away, then keep ticking
    pub async fn start(&self) -> Result<()> {
        tracing::info!("⏰ Starting scheduler service (interval {:?})", self.interval);

        let synced = self.passes.sync_all_schedules().await?;
        tracing::info!("📊 Synced schedules of {} workflows", synced);
        self.passes.run_once().await;

        let passes = self.passes.clone();
        let job = Job::new_repeated_async(self.interval, move |_uuid, _l| {
            let passes = passes.clone();
            Box::pin(async move {
                passes.run_once().await;
            })
        })?;

        {
            let scheduler = self.scheduler.read().await;
            scheduler.add(job).await?;
            scheduler.start().await?;
        }

        tracing::info!("✅ Scheduler service started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        tracing::info!("⏹️ Stopping scheduler service");
        let mut scheduler = self.scheduler.write().await;
        scheduler.shutdown().await?;
        Ok(())
    }
}
