use anyhow::{Context, Result};
use porter_core::GalleryStore;
use porter_hw::{Actuator, GpioRelay, SimulatedRelay, SnapshotSource};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod audit;
mod clock;
mod config;
mod context;
mod dbus_interface;
mod engine;
mod notify;
mod oracle_client;
mod permission;
mod resolve;
mod state;
#[cfg(test)]
mod testing;
mod unlock;

use context::{AccessContext, Collaborators};
use dbus_interface::{DbusSecurityAction, PorterService, BUS_NAME, OBJECT_PATH};
use engine::AccessEngine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "porterd starting");

    let config = config::Config::load().context("failed to load configuration")?;
    tracing::info!(
        frame = %config.frame_path.display(),
        oracle = %config.oracle_socket.display(),
        gallery = %config.gallery_path.display(),
        "configuration loaded"
    );

    let (notifier, feed) = notify::spawn_feed(config.notification_queue, config.notification_history);
    let audit = audit::SqliteAccessLog::open(&config.audit_db_path).context("failed to open access log")?;

    let actuator: Arc<dyn Actuator> = match config.relay_gpio {
        Some(pin) => {
            let relay = GpioRelay::open(pin, config.relay_active_low)
                .with_context(|| format!("failed to set up relay on gpio{pin}"))?;
            tracing::info!(pin, active_low = config.relay_active_low, "door relay ready");
            Arc::new(relay)
        }
        None => {
            tracing::warn!("no relay configured; door unlocks are simulated");
            Arc::new(SimulatedRelay::default())
        }
    };

    let ctx = Arc::new(AccessContext::open(
        config.policy(),
        Collaborators {
            clock: Arc::new(clock::SystemClock),
            oracle: Arc::new(oracle_client::ServiceOracle::new(&config.oracle_socket, config.oracle_timeout())),
            notifier,
            audit: Arc::new(audit),
            actuator,
        },
        GalleryStore::new(&config.gallery_path),
        GalleryStore::new(&config.visitors_path),
    ));

    let service = PorterService::new(Arc::clone(&ctx), feed);
    let builder = if config.session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;
    tracing::info!(bus_name = BUS_NAME, session = config.session_bus, "D-Bus service registered");

    let security = DbusSecurityAction::new(conn.clone(), tokio::runtime::Handle::current());
    let engine = AccessEngine::new(
        Arc::clone(&ctx),
        Box::new(SnapshotSource::new(&config.frame_path)),
        config.loop_timing(),
        Some(Arc::new(security)),
    );
    let handle = engine::spawn_engine(engine).context("failed to spawn engine thread")?;

    tracing::info!("porterd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("porterd shutting down");

    // The worker may be mid-cycle (oracle call or unlock hold).
    tokio::task::spawn_blocking(move || handle.shutdown()).await?;
    drop(conn);

    Ok(())
}
