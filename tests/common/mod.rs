//! Shared harness: in-memory engine database, in-memory tenants and a manual clock.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hrflow::actions::{ActionContext, ActionExecutor, ActionRegistry, DeliveryClient};
use hrflow::error::ActionError;
use hrflow::runtime::{
    Clock, ContractExpiryTrigger, ExecutionEngine, ManualClock, NodeExecutor, Scheduler,
    TimeTrigger,
};
use hrflow::storage::{self, ExecutionStore, LogStatus, NewExecution, WorkflowExecution, WorkflowLog};
use hrflow::tenant::TenantDatabaseManager;
use hrflow::workflow::{storage::WorkflowStorage, Workflow, WorkflowRegistry};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap()
}

/// Action that fails a configurable number of times before succeeding
#[derive(Default)]
pub struct FlakyAction {
    failures_left: AtomicU32,
    calls: AtomicU32,
}

impl FlakyAction {
    pub fn fail_next(&self, times: u32) {
        self.failures_left.store(times, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActionExecutor for FlakyAction {
    async fn execute(&self, params: &Value, _ctx: &ActionContext<'_>) -> Result<Value, ActionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(ActionError::failed("upstream unavailable"));
        }
        Ok(json!({ "ok": true, "params": params }))
    }
}

/// Action that signals when it starts and then takes a while to finish
#[derive(Default)]
pub struct SlowAction {
    pub started: Notify,
}

#[async_trait]
impl ActionExecutor for SlowAction {
    async fn execute(&self, _params: &Value, _ctx: &ActionContext<'_>) -> Result<Value, ActionError> {
        self.started.notify_one();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        Ok(json!({ "slow": true }))
    }
}

/// Custom reminder action registered next to the built-ins
pub struct SendReminder;

#[async_trait]
impl ActionExecutor for SendReminder {
    async fn execute(&self, params: &Value, ctx: &ActionContext<'_>) -> Result<Value, ActionError> {
        let to = params
            .get("to")
            .and_then(Value::as_str)
            .ok_or_else(|| ActionError::invalid("missing 'to'"))?;
        Ok(json!({ "reminded": to, "at": ctx.now.to_rfc3339() }))
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: ExecutionStore,
    pub registry: Arc<WorkflowRegistry>,
    pub tenants: Arc<TenantDatabaseManager>,
    pub flaky: Arc<FlakyAction>,
    pub slow: Arc<SlowAction>,
    pub engine: Arc<ExecutionEngine>,
    pub scheduler: Scheduler,
}

impl Harness {
    pub async fn new() -> Self {
        let clock = Arc::new(ManualClock::new(start_time()));
        let shared_clock: Arc<dyn Clock> = clock.clone();

        let pool = storage::connect_in_memory().await.unwrap();
        let store = ExecutionStore::new(pool.clone());
        let workflow_storage = WorkflowStorage::new(pool);
        workflow_storage.init_schema().await.unwrap();
        let registry = Arc::new(WorkflowRegistry::new(workflow_storage));

        let tenants = Arc::new(TenantDatabaseManager::in_memory());
        let flaky = Arc::new(FlakyAction::default());
        let slow = Arc::new(SlowAction::default());

        let mut actions =
            ActionRegistry::with_builtins(Arc::clone(&tenants), Arc::new(DeliveryClient::disabled()));
        actions.register("send_reminder", Arc::new(SendReminder));
        actions.register("flaky", flaky.clone());
        actions.register("slow", slow.clone());

        let engine = Arc::new(ExecutionEngine::new(
            store.clone(),
            Arc::clone(&registry),
            Arc::new(NodeExecutor::new(Arc::new(actions))),
            shared_clock.clone(),
        ));

        let triggers: Vec<Arc<dyn TimeTrigger>> =
            vec![Arc::new(ContractExpiryTrigger::new(Arc::clone(&tenants)))];
        let scheduler = Scheduler::new(store.clone(), Arc::clone(&registry), triggers, shared_clock);

        Self {
            clock,
            store,
            registry,
            tenants,
            flaky,
            slow,
            engine,
            scheduler,
        }
    }

    pub async fn publish(&self, definition: Value) -> Workflow {
        let workflow: Workflow = serde_json::from_value(definition).unwrap();
        self.registry.register(workflow.clone()).await.unwrap();
        self.scheduler.sync_workflow_schedule(&workflow).await.unwrap();
        workflow
    }

    pub async fn start(&self, workflow: &Workflow, trigger_data: Value) -> WorkflowExecution {
        let trigger_data: Map<String, Value> = trigger_data.as_object().cloned().unwrap_or_default();
        self.store
            .create_execution(
                NewExecution::for_workflow(workflow, trigger_data, Map::new()),
                self.clock.now(),
            )
            .await
            .unwrap()
    }

    pub async fn execution(&self, id: &str) -> WorkflowExecution {
        self.store.get_execution(id).await.unwrap().unwrap()
    }

    pub async fn logs(&self, id: &str) -> Vec<WorkflowLog> {
        self.store.list_logs(id).await.unwrap()
    }

    /// `(node_id, status)` of every log row, in order
    pub async fn log_trail(&self, id: &str) -> Vec<(String, LogStatus)> {
        self.logs(id)
            .await
            .into_iter()
            .map(|log| (log.node_id, log.status))
            .collect()
    }
}

/// Trigger → create_task → priority check → email, or wait a day and remind
pub fn onboarding_workflow() -> Value {
    json!({
        "id": "wf-onboarding",
        "tenant_id": "acme",
        "name": "New hire onboarding",
        "nodes": [
            { "id": "start", "type": "trigger", "next_node_id": "task" },
            { "id": "task", "type": "action", "next_node_id": "check",
              "config": { "action_type": "create_task",
                          "params": { "title": "Prepare laptop for {{trigger.name}}" } } },
            { "id": "check", "type": "condition",
              "config": { "field": "{{trigger.priority}}", "operator": "equals", "value": "high" },
              "true_branch": "email", "false_branch": "pause" },
            { "id": "email", "type": "action",
              "config": { "action_type": "send_email",
                          "params": { "to": "{{trigger.email}}", "subject": "Welcome {{trigger.name}}" } } },
            { "id": "pause", "type": "wait", "config": { "duration": "24h" }, "next_node_id": "remind" },
            { "id": "remind", "type": "action",
              "config": { "action_type": "send_reminder", "params": { "to": "{{trigger.email}}" } } }
        ]
    })
}

pub fn new_hire(priority: &str) -> Value {
    json!({ "name": "Ana", "email": "ana@example.com", "priority": priority })
}
