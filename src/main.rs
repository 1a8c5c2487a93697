//! Zone process entry point.
//!
//! Connects storage and the coordinator relay, loads the expedition
//! cache, and runs the zone event loop until interrupted.
//!
//! Only relay traffic reaches the loop from here. Player commands,
//! connects and script calls come from the zone's client transport,
//! which embeds the library and feeds [`ZoneEvent`]s through the sender
//! half of the event channel. This binary holds that sender so the loop
//! stays alive until shutdown.
//!
//! [`ZoneEvent`]: dz_expeditions::zone_process::ZoneEvent

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use dz_expeditions::config::{LogFormat, ZoneConfig};
use dz_expeditions::persistence::PostgresExpeditionStore;
use dz_expeditions::relay::TcpRelayLink;
use dz_expeditions::session::LocalSessions;
use dz_expeditions::zone_context::ZoneContext;
use dz_expeditions::zone_process::ZoneProcess;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ZoneConfig::from_env().map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    let identity = config.identity();
    tracing::info!(%identity, world = %config.world_addr, "starting zone process");

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .min_connections(config.database_min_connections)
        .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    let (relay_tx, relay_rx) = mpsc::channel(config.relay_channel_capacity);
    let link = TcpRelayLink::connect(config.world_addr, config.relay_channel_capacity, relay_tx)
        .await
        .context("failed to connect to coordinator")?;

    let ctx = ZoneContext::new(
        identity,
        Arc::new(LocalSessions::new()),
        Arc::new(PostgresExpeditionStore::new(pool)),
        Arc::new(link),
        config.expeditions,
    );
    let mut zone = ZoneProcess::new(ctx);
    let cached = zone.load().await.context("failed to load expeditions")?;
    tracing::info!(cached, "expedition cache ready");

    // no client transport is attached here; see the module docs
    let (events_tx, events_rx) = mpsc::channel(config.relay_channel_capacity);
    let mut process = tokio::spawn(zone.run(events_rx, relay_rx));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for shutdown signal")?;
            tracing::info!("shutdown requested");
        }
        result = &mut process => {
            result.context("zone process task failed")?;
        }
    }
    drop(events_tx);

    Ok(())
}
