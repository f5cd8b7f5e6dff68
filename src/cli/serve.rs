use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::AppConfig;
use crate::core::lifecycle::LifecycleManager;
use crate::core::runtime::{QueueService, Runtime};
use crate::core::terminal;
use crate::interfaces::web::{ApiServer, AppState};
use crate::logging;

/// Boots the queue worker and API server, then waits for Ctrl-C.
pub async fn run_server(config: AppConfig) -> Result<()> {
    let log_tx = logging::init(config.logging.max_level(), false);
    terminal::print_banner();

    let host = config.api.host.clone();
    let port = config.api.port;
    let (runtime, receiver) = Runtime::from_config(config).await?;
    let runtime = Arc::new(runtime);

    let mut lifecycle = LifecycleManager::new();
    lifecycle.attach(Arc::new(Mutex::new(QueueService::new(
        runtime.clone(),
        receiver,
    ))));
    lifecycle.attach(Arc::new(Mutex::new(ApiServer::new(AppState::new(
        runtime.clone(),
        log_tx,
    )))));
    lifecycle.start().await?;

    terminal::print_link("API", &format!("http://{}:{}/api/health", host, port));
    terminal::print_status("Press Ctrl+C to stop", "agents keep running on their schedules");
    println!();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    lifecycle.shutdown().await?;
    Ok(())
}
