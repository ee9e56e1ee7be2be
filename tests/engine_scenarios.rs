//! End-to-end runs of the engine against in-memory stores.
mod common;

use chrono::Duration;
use common::{new_hire, onboarding_workflow, Harness};
use hrflow::runtime::Clock;
use hrflow::runtime::engine::CANCELLED_BY_OPERATOR;
use hrflow::storage::{ExecutionStatus, LogStatus};
use hrflow::tenant::RecordQuery;
use serde_json::json;

fn action_nodes() -> [&'static str; 3] {
    ["task", "email", "remind"]
}

#[tokio::test]
async fn high_priority_hire_completes_in_one_pass() {
    let h = Harness::new().await;
    let workflow = h.publish(onboarding_workflow()).await;
    let execution = h.start(&workflow, new_hire("high")).await;

    assert_eq!(h.engine.run_until_idle().await.unwrap(), 1);

    let done = h.execution(&execution.id).await;
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(done.resume_at, None);
    assert_eq!(done.last_error, None);

    let action_logs: Vec<_> = h
        .logs(&execution.id)
        .await
        .into_iter()
        .filter(|log| action_nodes().contains(&log.node_id.as_str()))
        .collect();
    assert_eq!(action_logs.len(), 2);
    assert_eq!(action_logs[0].node_id, "task");
    assert_eq!(action_logs[1].node_id, "email");
    assert!(action_logs.iter().all(|log| log.status == LogStatus::Success));

    assert_eq!(done.context.node_outputs["check"]["result"], json!(true));
    assert!(done.context.node_outputs.get("pause").is_none());

    let tasks = h
        .tenants
        .records("acme")
        .await
        .unwrap()
        .query(&RecordQuery {
            collection: "tasks".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["title"], json!("Prepare laptop for Ana"));

    let outbox = h.tenants.outbox("acme").await.unwrap().list("email").await.unwrap();
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].recipient, "ana@example.com");
    assert_eq!(outbox[0].payload["subject"], json!("Welcome Ana"));
}

#[tokio::test]
async fn low_priority_hire_waits_a_day_before_the_reminder() {
    let h = Harness::new().await;
    let workflow = h.publish(onboarding_workflow()).await;
    let execution = h.start(&workflow, new_hire("low")).await;
    let started = h.clock.now();

    h.engine.run_until_idle().await.unwrap();

    let waiting = h.execution(&execution.id).await;
    assert_eq!(waiting.status, ExecutionStatus::Waiting);
    assert_eq!(waiting.current_node_id.as_deref(), Some("pause"));
    assert_eq!(waiting.resume_at, Some(started + Duration::hours(24)));
    assert_eq!(waiting.lease_id, None);

    // Not due yet: nothing resumes, nothing runs
    h.clock.advance(Duration::hours(23));
    assert_eq!(h.scheduler.run_once().await.resumed, 0);
    assert_eq!(h.engine.run_until_idle().await.unwrap(), 0);
    assert!(!h.log_trail(&execution.id).await.iter().any(|(node, _)| node == "remind"));

    h.clock.advance(Duration::hours(1));
    assert_eq!(h.scheduler.run_once().await.resumed, 1);
    assert_eq!(h.engine.run_until_idle().await.unwrap(), 1);

    let done = h.execution(&execution.id).await;
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(done.context.node_outputs["remind"]["reminded"], json!("ana@example.com"));
    assert_eq!(done.context.wait_deadline("pause"), None);

    let trail = h.log_trail(&execution.id).await;
    let reminders: Vec<_> = trail.iter().filter(|(node, _)| node == "remind").collect();
    assert_eq!(reminders, vec![&("remind".to_string(), LogStatus::Success)]);
}

#[tokio::test]
async fn transient_failures_are_retried_with_backoff() {
    let h = Harness::new().await;
    let workflow = h
        .publish(json!({
            "id": "wf-sync",
            "tenant_id": "acme",
            "name": "Sync payroll",
            "nodes": [
                { "id": "start", "type": "trigger", "next_node_id": "sync" },
                { "id": "sync", "type": "action", "config": { "action_type": "flaky" } }
            ]
        }))
        .await;
    h.flaky.fail_next(2);
    let execution = h.start(&workflow, json!({})).await;
    let started = h.clock.now();

    h.engine.run_until_idle().await.unwrap();
    let first = h.execution(&execution.id).await;
    assert_eq!(first.status, ExecutionStatus::Pending);
    assert_eq!(first.resume_at, Some(started + Duration::seconds(1)));
    assert!(first.last_error.as_deref().unwrap().contains("upstream unavailable"));

    // Retry is not claimable before its back-off elapses
    assert_eq!(h.engine.run_until_idle().await.unwrap(), 0);

    h.clock.advance(Duration::seconds(1));
    h.engine.run_until_idle().await.unwrap();
    let second = h.execution(&execution.id).await;
    assert_eq!(second.status, ExecutionStatus::Pending);
    assert_eq!(second.resume_at, Some(started + Duration::seconds(6)));

    h.clock.advance(Duration::seconds(5));
    h.engine.run_until_idle().await.unwrap();
    let done = h.execution(&execution.id).await;
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(h.flaky.calls(), 3);

    let sync_logs: Vec<_> = h
        .logs(&execution.id)
        .await
        .into_iter()
        .filter(|log| log.node_id == "sync")
        .map(|log| (log.attempt_number, log.status))
        .collect();
    assert_eq!(
        sync_logs,
        vec![
            (1, LogStatus::Retrying),
            (2, LogStatus::Retrying),
            (3, LogStatus::Success)
        ]
    );
}

#[tokio::test]
async fn exhausted_retries_fail_the_execution() {
    let h = Harness::new().await;
    let workflow = h
        .publish(json!({
            "id": "wf-sync",
            "tenant_id": "acme",
            "name": "Sync payroll",
            "nodes": [
                { "id": "start", "type": "trigger", "next_node_id": "sync" },
                { "id": "sync", "type": "action", "config": { "action_type": "flaky" } }
            ]
        }))
        .await;
    h.flaky.fail_next(10);
    let execution = h.start(&workflow, json!({})).await;

    for _ in 0..5 {
        h.engine.run_until_idle().await.unwrap();
        h.clock.advance(Duration::seconds(30));
    }

    let failed = h.execution(&execution.id).await;
    assert_eq!(failed.status, ExecutionStatus::Failed);
    assert_eq!(h.flaky.calls(), 3);
    assert_eq!(failed.context.attempts("sync"), 3);

    let statuses: Vec<_> = h
        .log_trail(&execution.id)
        .await
        .into_iter()
        .filter(|(node, _)| node == "sync")
        .map(|(_, status)| status)
        .collect();
    assert_eq!(
        statuses,
        vec![LogStatus::Retrying, LogStatus::Retrying, LogStatus::Failed]
    );
}

#[tokio::test]
async fn configuration_errors_fail_without_retry() {
    let h = Harness::new().await;
    let workflow = h
        .publish(json!({
            "id": "wf-broken",
            "tenant_id": "acme",
            "name": "Broken",
            "nodes": [
                { "id": "start", "type": "trigger", "next_node_id": "mystery" },
                { "id": "mystery", "type": "action", "config": { "action_type": "fax_document" } }
            ]
        }))
        .await;
    let execution = h.start(&workflow, json!({})).await;

    h.engine.run_until_idle().await.unwrap();

    let failed = h.execution(&execution.id).await;
    assert_eq!(failed.status, ExecutionStatus::Failed);
    let error = failed.last_error.unwrap();
    assert!(error.contains("mystery"), "{error}");
    assert!(error.contains("configuration error"), "{error}");
    assert_eq!(
        h.log_trail(&execution.id).await.last(),
        Some(&("mystery".to_string(), LogStatus::Failed))
    );
}

#[tokio::test]
async fn missing_email_recipient_is_not_retried() {
    let h = Harness::new().await;
    let workflow = h.publish(onboarding_workflow()).await;
    let execution = h
        .start(&workflow, json!({ "name": "Ana", "priority": "high" }))
        .await;

    h.engine.run_until_idle().await.unwrap();

    let failed = h.execution(&execution.id).await;
    assert_eq!(failed.status, ExecutionStatus::Failed);
    assert_eq!(failed.current_node_id.as_deref(), Some("email"));
    assert_eq!(
        h.log_trail(&execution.id).await.last(),
        Some(&("email".to_string(), LogStatus::Failed))
    );
}

#[tokio::test]
async fn cancelled_waiting_execution_never_resumes() {
    let h = Harness::new().await;
    let workflow = h.publish(onboarding_workflow()).await;
    let execution = h.start(&workflow, new_hire("low")).await;
    h.engine.run_until_idle().await.unwrap();
    assert_eq!(h.execution(&execution.id).await.status, ExecutionStatus::Waiting);

    assert!(h.engine.cancel(&execution.id).await.unwrap());
    assert!(!h.engine.cancel(&execution.id).await.unwrap());

    h.clock.advance(Duration::days(2));
    assert_eq!(h.scheduler.run_once().await.resumed, 0);
    assert_eq!(h.engine.run_until_idle().await.unwrap(), 0);

    let cancelled = h.execution(&execution.id).await;
    assert_eq!(cancelled.status, ExecutionStatus::Failed);
    assert_eq!(cancelled.last_error.as_deref(), Some(CANCELLED_BY_OPERATOR));
    assert_eq!(cancelled.resume_at, None);
}

#[tokio::test]
async fn cancelled_claim_discards_engine_writes() {
    let h = Harness::new().await;
    let workflow = h.publish(onboarding_workflow()).await;
    let execution = h.start(&workflow, new_hire("high")).await;

    let claimed = h.store.claim_next(h.clock.now()).await.unwrap().unwrap();
    assert_eq!(claimed.id, execution.id);
    h.engine.cancel(&execution.id).await.unwrap();

    let returned = h.engine.advance(claimed).await.unwrap();
    assert_eq!(returned.status, ExecutionStatus::Failed);
    assert!(h.logs(&execution.id).await.is_empty());
}

#[tokio::test]
async fn missing_condition_branch_completes_the_execution() {
    let h = Harness::new().await;
    let workflow = h
        .publish(json!({
            "id": "wf-escalate",
            "tenant_id": "acme",
            "name": "Escalate urgent tickets",
            "nodes": [
                { "id": "start", "type": "trigger", "next_node_id": "urgent" },
                { "id": "urgent", "type": "condition",
                  "config": { "field": "{{trigger.priority}}", "operator": "equals", "value": "high" },
                  "true_branch": "notify" },
                { "id": "notify", "type": "action",
                  "config": { "action_type": "send_notification",
                              "params": { "user_id": "hr-lead", "title": "Urgent ticket", "message": "A ticket needs attention" } } }
            ]
        }))
        .await;
    let execution = h.start(&workflow, json!({ "priority": "low" })).await;

    h.engine.run_until_idle().await.unwrap();

    let done = h.execution(&execution.id).await;
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(done.context.node_outputs["urgent"]["result"], json!(false));
    assert!(!h.log_trail(&execution.id).await.iter().any(|(node, _)| node == "notify"));
}

#[tokio::test]
async fn deleted_workflow_fails_its_queued_executions() {
    let h = Harness::new().await;
    let workflow = h.publish(onboarding_workflow()).await;
    let execution = h.start(&workflow, new_hire("high")).await;

    assert!(h.registry.remove_workflow(&workflow.id).await.unwrap());
    h.engine.run_until_idle().await.unwrap();

    let failed = h.execution(&execution.id).await;
    assert_eq!(failed.status, ExecutionStatus::Failed);
    assert!(failed.last_error.unwrap().contains("not found"));
}

#[tokio::test]
async fn saved_variables_flow_into_later_nodes() {
    let h = Harness::new().await;
    let workflow = h
        .publish(json!({
            "id": "wf-followup",
            "tenant_id": "acme",
            "name": "Follow-up",
            "variables": { "owner": "hr-lead" },
            "nodes": [
                { "id": "start", "type": "trigger", "next_node_id": "task" },
                { "id": "task", "type": "action", "next_node_id": "done",
                  "config": { "action_type": "create_task", "save_as": "onboarding_task",
                              "params": { "title": "Collect documents", "assignee_id": "{{owner}}" } } },
                { "id": "done", "type": "action",
                  "config": { "action_type": "complete_task",
                              "params": { "task_id": "{{onboarding_task.task_id}}" } } }
            ]
        }))
        .await;
    let execution = h.start(&workflow, json!({})).await;

    h.engine.run_until_idle().await.unwrap();

    let done = h.execution(&execution.id).await;
    assert_eq!(done.status, ExecutionStatus::Completed, "{:?}", done.last_error);
    let task_id = done.context.variables["onboarding_task"]["task_id"].clone();
    assert_eq!(done.context.node_outputs["task"]["assignee_id"], json!("hr-lead"));

    let task = h
        .tenants
        .records("acme")
        .await
        .unwrap()
        .get("tasks", task_id.as_str().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task["status"], json!("completed"));
}

#[tokio::test]
async fn duplicate_record_id_fails_without_retry() {
    let h = Harness::new().await;
    let workflow = h
        .publish(json!({
            "id": "wf-hire",
            "tenant_id": "acme",
            "name": "Register hire",
            "nodes": [
                { "id": "start", "type": "trigger", "next_node_id": "create" },
                { "id": "create", "type": "action",
                  "config": { "action_type": "create_record",
                              "params": { "collection": "employees",
                                          "data": { "id": "1", "name": "{{trigger.name}}" } } } }
            ]
        }))
        .await;
    h.tenants
        .records("acme")
        .await
        .unwrap()
        .insert(
            "employees",
            json!({ "id": "1", "name": "Bo" }).as_object().cloned().unwrap(),
            h.clock.now(),
        )
        .await
        .unwrap();
    let execution = h.start(&workflow, new_hire("high")).await;

    for _ in 0..3 {
        h.engine.run_until_idle().await.unwrap();
        h.clock.advance(Duration::seconds(30));
    }

    let failed = h.execution(&execution.id).await;
    assert_eq!(failed.status, ExecutionStatus::Failed);
    assert_eq!(failed.context.attempts("create"), 1);
    let error = failed.last_error.unwrap();
    assert!(error.contains("configuration error"), "{error}");

    let statuses: Vec<_> = h
        .log_trail(&execution.id)
        .await
        .into_iter()
        .filter(|(node, _)| node == "create")
        .map(|(_, status)| status)
        .collect();
    assert_eq!(statuses, vec![LogStatus::Failed]);
}
