//! FleetWatch server-fleet health tracker.
//!
//! Composition root: wires the store, scheduler, notifier and sentinel
//! together and runs until interrupted.

use fleetwatch::config::SentinelConfig;
use fleetwatch::db::{Monitor, Store};
use fleetwatch::i18n::StaticLocalizer;
use fleetwatch::notify::LogNotifier;
use fleetwatch::scheduler::CronScheduler;
use fleetwatch::sentinel::{Sentinel, ServerRegistry};

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fleetwatch=info".parse()?),
        )
        .init();

    let cfg = SentinelConfig::load();
    tracing::info!("Starting FleetWatch");
    tracing::info!("Using database at {}", cfg.db_path);

    let store = Store::new(&cfg.db_path)?;

    // Seed a sample monitor on first run.
    if store.load_monitors()?.is_empty() {
        tracing::info!("Adding sample monitor: Example");
        let mut monitor = Monitor {
            name: "Example".to_string(),
            target: "https://example.com".to_string(),
            cron_spec: "@every 30s".to_string(),
            ..Default::default()
        };
        store.add_monitor(&mut monitor)?;
    }

    let scheduler = Arc::new(CronScheduler::new());
    let notifier = Arc::new(LogNotifier);
    let localizer = Arc::new(StaticLocalizer::new());
    let servers: ServerRegistry = Arc::new(RwLock::new(HashMap::new()));

    let (dispatch_tx, mut dispatch_rx) = mpsc::channel(cfg.dispatch_depth);

    let sentinel = Sentinel::start(store, scheduler, notifier, localizer, servers, dispatch_tx)?;
    tracing::info!(monitors = sentinel.monitors().len(), "sentinel started");

    // TODO: wire the reporter RPC transport onto the dispatch bus; until
    // then probe tasks are drained and logged.
    tokio::spawn(async move {
        while let Some(monitor) = dispatch_rx.recv().await {
            tracing::debug!(
                monitor = monitor.id,
                probe_target = %monitor.target,
                "probe task dispatched"
            );
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    sentinel.shutdown();

    Ok(())
}
