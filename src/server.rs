/// Server setup and initialization
///
/// Wires together storage, registry, actions, engine, workers, scheduler and
/// HTTP routes. Background tasks stop when the cancellation token fires.

use crate::{
    actions::{ActionRegistry, DeliveryClient},
    api::{create_router, AppState},
    config::Config,
    runtime::{
        clock::{Clock, SystemClock},
        engine::{ExecutionEngine, RetryPolicy},
        executor::NodeExecutor,
        scheduler::{Scheduler, SchedulerService},
        triggers::{ContractExpiryTrigger, TimeTrigger},
        worker::{self, WorkerPool},
    },
    storage::{self, ExecutionStore},
    tenant::TenantDatabaseManager,
    workflow::{registry::WorkflowRegistry, storage::WorkflowStorage},
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::{path::Path, sync::Arc, time::Duration};
use tokio::{net::TcpListener, task::JoinSet};
use tokio_util::sync::CancellationToken;

/// Create the Axum application and start the background services
///
/// The returned worker set stops once `cancel` fires; the caller drains it.
pub async fn create_app(
    config: Config,
    cancel: CancellationToken,
) -> Result<(Router, JoinSet<()>)> {
    tracing::info!("📁 Ensuring data directory exists: {}", config.database.data_dir);
    std::fs::create_dir_all(&config.database.data_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create data directory: {}", e))?;

    let engine_pool = storage::connect(Path::new(&config.database.engine_db))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open engine database: {}", e))?;
    let store = ExecutionStore::new(engine_pool.clone());

    let workflow_storage = WorkflowStorage::new(engine_pool);
    workflow_storage.init_schema().await?;

    tracing::info!("📊 Initializing workflow registry");
    let registry = Arc::new(WorkflowRegistry::new(workflow_storage));
    registry
        .init_from_storage()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load workflows from storage: {}", e))?;

    tracing::info!("🏗️ Initializing tenant database manager");
    let tenants = Arc::new(TenantDatabaseManager::new(&config.database.data_dir));

    let delivery = Arc::new(DeliveryClient::new(
        config.delivery.url.clone(),
        Duration::from_secs(config.delivery.timeout_secs),
    )?);
    if !delivery.is_enabled() {
        tracing::info!("📮 No delivery endpoint configured, emails stay in tenant outboxes");
    }
    let actions = Arc::new(ActionRegistry::with_builtins(Arc::clone(&tenants), delivery));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let retry = RetryPolicy {
        max_attempts: config.engine.retry_max_attempts.max(1),
        backoff: config
            .engine
            .retry_backoff_ms
            .iter()
            .map(|ms| chrono::Duration::milliseconds(*ms as i64))
            .collect(),
    };

    tracing::info!("🚀 Initializing execution engine");
    let engine = Arc::new(
        ExecutionEngine::new(
            store.clone(),
            Arc::clone(&registry),
            Arc::new(
                NodeExecutor::new(actions).with_wait_poll_interval(chrono::Duration::seconds(
                    config.engine.wait_poll_interval_secs.max(1) as i64,
                )),
            ),
            Arc::clone(&clock),
        )
        .with_retry_policy(retry)
        .with_max_steps(config.engine.max_steps),
    );

    let triggers: Vec<Arc<dyn TimeTrigger>> = vec![Arc::new(ContractExpiryTrigger::new(tenants))];
    let scheduler = Scheduler::new(store.clone(), Arc::clone(&registry), triggers, Arc::clone(&clock))
        .with_stale_after(chrono::Duration::seconds(config.scheduler.stale_after_secs as i64));

    tracing::info!("⏰ Initializing scheduler service");
    let scheduler_service = Arc::new(
        SchedulerService::new(
            scheduler.clone(),
            Duration::from_secs(config.scheduler.interval_secs.max(1)),
        )
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize scheduler: {}", e))?,
    );
    scheduler_service.start().await?;

    let service = Arc::clone(&scheduler_service);
    let scheduler_cancel = cancel.clone();
    tokio::spawn(async move {
        scheduler_cancel.cancelled().await;
        if let Err(e) = service.stop().await {
            tracing::error!("❌ Failed to stop scheduler: {}", e);
        }
    });

    let workers = WorkerPool::new(
        Arc::clone(&engine),
        config.engine.workers,
        Duration::from_millis(config.engine.poll_interval_ms),
    )
    .spawn(cancel);

    let state = AppState {
        registry,
        store,
        engine,
        scheduler,
        clock,
    };

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let app = Router::new()
        .route("/healthz", get(health_check))
        .merge(create_router(state));

    tracing::info!("✅ Application initialized successfully");
    Ok((app, workers))
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting hrflow server...");

    let cancel = CancellationToken::new();
    let (app, workers) = create_app(config.clone(), cancel.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on http://{}", bind_addr);

    let shutdown = cancel.clone();
    let served = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("⏹️ Shutdown requested");
            shutdown.cancel();
        })
        .await;

    // The server may also stop on an I/O error; workers must not outlive it
    cancel.cancel();
    tracing::info!("⏳ Waiting for workers to finish in-flight executions");
    worker::drain(workers).await;

    served?;
    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}
