use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mcp_mesh_registry::config::RegistrySettings;
use mcp_mesh_registry::health_monitor::{HealthMonitor, HealthMonitorConfig};
use mcp_mesh_registry::server::{self, ServerState};
use mcp_mesh_registry::store::Store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = RegistrySettings::from_env();
    info!(host = %settings.host, port = settings.port, database_url = %settings.database_url, "starting registry");

    let store = Arc::new(Store::connect(&settings.database_url).await?);

    let monitor = HealthMonitor::new(
        store.clone(),
        HealthMonitorConfig {
            scan_interval_s: settings.health_check_interval_s,
            default_timeout_threshold_s: settings.default_timeout_threshold_s,
            default_eviction_threshold_s: settings.default_eviction_threshold_s,
        },
    );
    let monitor_stats = monitor.stats_handle();
    tokio::spawn(monitor.run());

    let state = ServerState { store, monitor_stats };
    let app = server::build_router(state);

    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "registry listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
