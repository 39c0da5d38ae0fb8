//! Beacon telemetry agent.
//!
//! Composition root: loads configuration, opens the request database, and
//! runs one foreground session until a shutdown signal arrives. Requests
//! that cannot be delivered before exit stay on disk for the next run.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use beacon_core::{FixedDeviceId, Storage};
use beacon_sdk::{HeartbeatTimer, SdkConfig, SessionController, StaticDeviceInfo};
use tracing::{info, warn};

const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let config = SdkConfig::load().context("Failed to load configuration")?;
    init_tracing(&config.rust_log)?;

    info!(
        server_url = %config.server_url,
        database = %config.database_path.display(),
        heartbeat_secs = config.heartbeat_interval_secs,
        "Configuration loaded"
    );

    let storage = Storage::open(&config.database_path)
        .await
        .context("Failed to open request database")?;
    storage.health_check().await.context("Request database is unhealthy")?;
    info!(
        queued = storage.connections.len().await?,
        pending_events = storage.events.len().await?,
        "Request database opened"
    );

    let device_id = std::env::var("BEACON_DEVICE_ID")
        .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());
    let controller = Arc::new(
        SessionController::init(
            &config,
            storage.clone(),
            Arc::new(FixedDeviceId::new(device_id)),
            Arc::new(StaticDeviceInfo::current(env!("CARGO_PKG_VERSION"))),
        )
        .await
        .context("Failed to initialize beacon")?,
    );
    let timer = HeartbeatTimer::start(controller.clone(), config.heartbeat_interval());

    controller.on_foreground_enter().await?;
    controller.record_event("agent_started", None, 1, 0.0).await?;
    info!("Beacon session running");

    shutdown_signal().await;
    info!("Shutdown signal received, ending session");

    timer.stop();
    controller.on_foreground_exit().await?;

    let queue = controller.delivery_queue().await?;
    tokio::select! {
        () = tokio::time::sleep(SHUTDOWN_GRACE_PERIOD) => {
            warn!("Shutdown grace period expired, undelivered requests kept for next run");
        }
        () = queue.wait_until_idle() => {
            info!(remaining = storage.connections.len().await?, "Delivery queue idle");
        }
    }

    storage.pool().close().await;
    info!("Beacon shutdown complete");
    Ok(())
}

/// Initializes tracing, preferring `RUST_LOG` over the configured filter.
fn init_tracing(default_filter: &str) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .context("Invalid log filter")?;

    let fmt_layer = fmt::layer().with_target(true).with_file(true).with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C signal");
        },
        () = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
