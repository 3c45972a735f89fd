//! Daemon mode for liewave: loads the model once and serves predictions over IPC.

pub mod handler;

use crate::config::Config;
use crate::error::{LiewaveError, Result};
use crate::ipc::server::IpcServer;
use crate::model::ModelRuntime;
use crate::orchestrator::Orchestrator;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{error, info};

/// Run the daemon: load model, start IPC server, wait for shutdown.
///
/// # Arguments
/// * `config` - Validated configuration
/// * `socket_path` - Overrides `server.socket` and the default socket path
///
/// # Returns
/// Ok(()) on graceful shutdown, error when the model or storage cannot be set up
pub async fn run_daemon(config: Config, socket_path: Option<PathBuf>) -> Result<()> {
    info!("Loading model from {}", config.model.path.display());
    let model_dir = config.model.path.clone();
    let model = tokio::task::spawn_blocking(move || ModelRuntime::global().initialize(&model_dir))
        .await
        .map_err(|e| LiewaveError::ModelLoad {
            path: config.model.path.display().to_string(),
            message: format!("Loader task failed: {e}"),
        })??;

    let orchestrator = Arc::new(Orchestrator::from_config(&config, model)?);
    info!("Model ready: {}", orchestrator.classifier_name());

    let socket_path = socket_path
        .or_else(|| config.server.socket.clone())
        .unwrap_or_else(IpcServer::default_socket_path);
    let server = Arc::new(IpcServer::new(socket_path));

    let shutdown = Arc::new(Notify::new());
    let handler = handler::DaemonCommandHandler::new(
        orchestrator,
        ModelRuntime::global(),
        config.server.max_concurrent_requests,
        Arc::clone(&shutdown),
    );

    let server_clone = Arc::clone(&server);
    let server_handle = tokio::spawn(async move { server_clone.start(handler).await });
    info!(
        "Listening at {} ({} concurrent requests)",
        server.socket_path().display(),
        config.server.max_concurrent_requests
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down");
        }
        res = wait_for_sigterm() => {
            if let Err(e) = res {
                error!("Error setting up signal handler: {}", e);
            }
            info!("Received SIGTERM, shutting down");
        }
        _ = shutdown.notified() => {
            info!("Shutting down on request");
        }
    }

    server.stop()?;

    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("IPC server failed: {}", e),
        Err(e) => error!("IPC server task failed: {}", e),
    }

    info!("Daemon stopped");
    Ok(())
}

/// Wait for SIGTERM (sent by service managers).
#[cfg(unix)]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate()).map_err(|e| LiewaveError::IpcSocket {
        message: format!("Failed to register SIGTERM handler: {}", e),
    })?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> Result<()> {
    std::future::pending::<()>().await;
    Ok(())
}
