//! Worker pool shutdown with an execution in flight.
mod common;

use common::Harness;
use hrflow::runtime::{drain, WorkerPool};
use hrflow::storage::ExecutionStatus;
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn cancelled_workers_finish_the_claimed_execution() {
    let h = Harness::new().await;
    let workflow = h
        .publish(json!({
            "id": "wf-export",
            "tenant_id": "acme",
            "name": "Payroll export",
            "nodes": [
                { "id": "start", "type": "trigger", "next_node_id": "export" },
                { "id": "export", "type": "action", "config": { "action_type": "slow" } }
            ]
        }))
        .await;
    let execution = h.start(&workflow, json!({})).await;

    let cancel = CancellationToken::new();
    let workers = WorkerPool::new(Arc::clone(&h.engine), 2, Duration::from_millis(10))
        .spawn(cancel.clone());

    h.slow.started.notified().await;
    cancel.cancel();
    assert_eq!(h.execution(&execution.id).await.status, ExecutionStatus::Running);

    tokio::time::timeout(Duration::from_secs(5), drain(workers))
        .await
        .expect("workers did not stop");

    let done = h.execution(&execution.id).await;
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(done.lease_id, None);
    assert_eq!(done.context.node_outputs["export"], json!({ "slow": true }));
}

#[tokio::test]
async fn idle_workers_stop_promptly() {
    let h = Harness::new().await;
    let cancel = CancellationToken::new();
    let workers = WorkerPool::new(Arc::clone(&h.engine), 3, Duration::from_secs(3600))
        .spawn(cancel.clone());

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), drain(workers))
        .await
        .expect("idle workers kept polling");
}
