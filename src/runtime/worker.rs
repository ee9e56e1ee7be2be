//! Worker pool draining pending executions
//!
//! Each worker loops: claim, advance, repeat; when nothing is claimable it
//! sleeps for the poll interval. Claims are atomic in the store, so any number
//! of workers (or processes) can share one engine database.

use crate::runtime::engine::ExecutionEngine;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub struct WorkerPool {
    engine: Arc<ExecutionEngine>,
    workers: usize,
    poll_interval: Duration,
}

impl WorkerPool {
    pub fn new(engine: Arc<ExecutionEngine>, workers: usize, poll_interval: Duration) -> Self {
        Self {
            engine,
            workers: workers.max(1),
            poll_interval,
        }
    }

    /// Spawn the workers; they stop when `cancel` fires
    pub fn spawn(self, cancel: CancellationToken) -> JoinSet<()> {
        tracing::info!(
            "👷 Starting {} workers (poll interval {:?})",
            self.workers,
            self.poll_interval
        );

        let mut set = JoinSet::new();
        for worker_id in 0..self.workers {
            let engine = Arc::clone(&self.engine);
            let cancel = cancel.clone();
            let poll_interval = self.poll_interval;
            set.spawn(async move { run_worker(worker_id, engine, poll_interval, cancel).await });
        }
        set
    }
}

/// Wait for every worker to stop, including the advance each was in the middle of
pub async fn drain(mut workers: JoinSet<()>) {
    let mut stopped = 0;
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            tracing::error!("❌ Worker task ended abnormally: {}", e);
        }
        stopped += 1;
    }
    tracing::info!("👷 All {} workers drained", stopped);
}

async fn run_worker(
    worker_id: usize,
    engine: Arc<ExecutionEngine>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    // An execution in progress is finished before the worker checks for shutdown
    while !cancel.is_cancelled() {
        let idle = match engine.process_next().await {
            Ok(Some(execution)) => {
                tracing::debug!(
                    "👷 Worker {} left execution {} {}",
                    worker_id,
                    execution.id,
                    execution.status
                );
                false
            }
            Ok(None) => true,
            Err(e) => {
                tracing::error!("❌ Worker {} failed to process execution: {}", worker_id, e);
                true
            }
        };

        if idle {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }
    tracing::info!("👷 Worker {} stopped", worker_id);
}
