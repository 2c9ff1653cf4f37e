//! Oracle Sync Service
//!
//! Polls on-chain oracle price accounts and streams updates to dashboard
//! clients over WebSocket.
//!
//! # Usage
//!
//! ```bash
//! ORACLE_SYNC_CONFIG=oracle-sync.toml cargo run
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use oracle_sync::{
    logging, run_server, ConnectionManager, FeedTable, HttpTransportFactory, PriceFeedService,
    Settings, SyncEvent, SyncService,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;
    logging::init(&settings.log)?;

    info!("Starting Oracle Sync Service");
    let config = &settings.oracle;

    let factory = HttpTransportFactory::new(config.transport.timeout())
        .context("Failed to create RPC transport")?;
    let connections = Arc::new(ConnectionManager::new(
        config.networks.clone(),
        config.retry.clone(),
        Arc::new(factory),
    ));
    let feeds = Arc::new(PriceFeedService::new(
        connections,
        FeedTable::from_config(&config.feeds),
    ));
    let sync = SyncService::new(feeds.clone(), &config.sync);

    // Subscribe before registering so no event is missed
    let mut event_rx = sync.subscribe();

    for spec in config
        .instance_specs(feeds.table())
        .context("Failed to resolve configured instances")?
    {
        sync.register_instance(spec)
            .context("Failed to register instance")?;
    }
    info!(
        "Tracking feeds: {}",
        sync.instances()
            .iter()
            .map(|i| format!("{} ({})", i.symbol, i.protocol))
            .collect::<Vec<_>>()
            .join(", ")
    );

    // Create broadcast channel for dashboard events (to WebSocket clients)
    let (broadcast_tx, _) = broadcast::channel::<SyncEvent>(config.sync.event_capacity.max(1));

    // Start WebSocket server
    if settings.server.enabled {
        let addr = settings.server.bind_addr.clone();
        let server_rx = broadcast_tx.subscribe();
        let server_sync = sync.clone();
        tokio::spawn(async move {
            run_server(&addr, server_rx, server_sync).await;
        });
    }

    // Start health timer task
    let health_tx = broadcast_tx.clone();
    let health_sync = sync.clone();
    let health_every = Duration::from_secs(settings.server.health_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(health_every);
        loop {
            interval.tick().await;
            let health = health_sync.get_health();
            info!(
                "Sync health: {} active, {} stopped, {} errored of {}",
                health.active, health.stopped, health.error, health.total
            );
            let _ = health_tx.send(SyncEvent::Health(health));
        }
    });

    let started = sync.start_all().await;
    info!("Started {} poll loops", started);

    // Process events and broadcast to clients
    let mut last_prices: HashMap<String, f64> = HashMap::new();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let event = tokio::select! {
            received = event_rx.recv() => match received {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Event dispatcher lagged, skipped {} events", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                info!("Shutdown requested");
                break;
            }
        };

        // Broadcast all events to WebSocket clients
        let _ = broadcast_tx.send(event.clone());

        match &event {
            SyncEvent::PriceUpdate(update) => {
                let key = update
                    .instance_id
                    .clone()
                    .unwrap_or_else(|| update.feed.symbol.clone());
                let price = update.feed.price;

                // Log price changes (avoid spamming on every update)
                let should_log = match last_prices.get(&key) {
                    Some(&last) if last != 0.0 => ((price - last) / last).abs() > 0.001,
                    _ => true,
                };

                if should_log {
                    info!(
                        "{} [{}]: ${:.4} (conf: ${:.4}, slot: {}{})",
                        update.feed.symbol,
                        update.feed.source,
                        price,
                        update.feed.confidence,
                        update.feed.slot,
                        if update.is_stale { ", stale" } else { "" }
                    );
                    last_prices.insert(key, price);
                }
            }
            SyncEvent::SyncError { instance_id, error } => {
                error!("Instance {} stopped syncing: {}", instance_id, error);
            }
            SyncEvent::SyncStarted { instance_id } => {
                debug!("Instance {} started", instance_id);
            }
            SyncEvent::SyncStopped { instance_id } => {
                last_prices.remove(instance_id);
                debug!("Instance {} stopped", instance_id);
            }
            SyncEvent::InstanceRegistered(instance) => {
                debug!("Instance {} registered for {}", instance.id, instance.symbol);
            }
            SyncEvent::InstanceUnregistered(instance) => {
                last_prices.remove(&instance.id);
            }
            // Health snapshots come from the timer task, not the sync service
            SyncEvent::Health(_) => {}
        }
    }

    sync.stop_all().await;
    info!("Oracle Sync Service stopped");
    Ok(())
}
