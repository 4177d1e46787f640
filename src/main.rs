//! Tool gateway daemon - main entry point.
//!
//! Loads the config, starts every backend, rebuilds the registry and serves
//! the IPC protocol on the loopback listen address until SIGINT/SIGTERM.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tool_gateway::health::HealthMonitor;
use tool_gateway::ipc::IpcServer;
use tool_gateway::{Config, Gateway};

#[derive(Debug, Parser)]
#[command(name = "tool-gatewayd", version, about = "Tool registry gateway daemon")]
struct Args {
    /// Path to the JSON config file.
    #[arg(short, long, env = "TOOL_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listen address (host:port).
    #[arg(long)]
    listen: Option<String>,

    /// Override the registry file path.
    #[arg(long)]
    registry: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(registry) = args.registry {
        config.registry.path = registry;
    }

    tool_gateway::observability::init_tracing(&config.observability);

    let addr: SocketAddr = config.server.listen_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let gateway = Arc::new(Gateway::from_config(&config));
    let shutdown = CancellationToken::new();

    tracing::info!(
        %addr,
        backends = config.backends.len(),
        registry = %config.registry.path.display(),
        "tool gateway starting"
    );

    // Callers can connect while backends are still starting; their tools
    // appear once the first reload lands.
    let startup = {
        let gateway = gateway.clone();
        let shutdown = shutdown.clone();
        let health = config.health.clone();
        tokio::spawn(async move {
            let summary = gateway.start().await;
            if let Some(error) = &summary.registry_error {
                tracing::error!(error = %error, "persisted registry was unusable");
            }
            HealthMonitor::new(gateway, &health, shutdown).spawn()
        })
    };

    let server = IpcServer::new(gateway.clone(), addr, config.ipc.clone()).with_cancel(shutdown.clone());
    let serve = server.serve_listener(listener);
    tokio::pin!(serve);

    tokio::select! {
        result = &mut serve => {
            if let Err(e) = result {
                tracing::error!(error = %e, "IPC server failed");
            }
        }
        _ = shutdown_signal() => {}
    }

    shutdown.cancel();
    if !startup.is_finished() {
        tracing::info!("shutdown during startup; abandoning backend starts");
        startup.abort();
    }
    if let Ok(monitor) = startup.await {
        let _ = monitor.await;
    }
    gateway.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
