use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;
use zbus::object_server::SignalEmitter;

mod config;
mod dbus_interface;
mod engine;

use dbus_interface::{RollcallService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = config::Config::from_env();
    tracing::debug!(?config, "configuration loaded");

    let engine = engine::spawn_engine(&config).context("failed to start engine")?;
    let mut outcomes = engine.subscribe();

    let builder = if config.system_bus {
        zbus::connection::Builder::system()?
    } else {
        zbus::connection::Builder::session()?
    };
    let conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, RollcallService::new(engine))?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(name = BUS_NAME, system_bus = config.system_bus, "rollcalld ready");

    let emitter = SignalEmitter::new(&conn, OBJECT_PATH)?.into_owned();
    tokio::spawn(async move {
        loop {
            match outcomes.recv().await {
                Ok(outcome) => {
                    let payload = match serde_json::to_string(&outcome) {
                        Ok(p) => p,
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to encode outcome");
                            continue;
                        }
                    };
                    if let Err(err) = RollcallService::outcome(&emitter, &payload).await {
                        tracing::warn!(error = %err, "failed to emit Outcome signal");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "outcome signal forwarding fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
