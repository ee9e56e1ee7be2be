/// hrflow: durable workflow automation for HR/CRM processes
///
/// The server provides:
/// - Workflow management API at /api/workflows/*
/// - Execution inspection and cancellation at /api/executions/*
/// - Webhook triggers at /webhook/{workflow_id}/*
/// - Health check at /healthz

use hrflow::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();
    start_server(config).await?;
    Ok(())
}
