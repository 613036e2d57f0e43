//! eSight collector service
//!
//! Registers performance tasks on eSight, polls them until SIGTERM or Ctrl-C,
//! then deletes the tasks again.

use anyhow::{Context, Result};
use esight_collector::publisher::resolve_broker;
use esight_collector::{shutdown, Collector, CollectorConfig, EsightClient, MqttPublisher};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Ok if .env is missing

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("esight_collector=info")),
        )
        .init();

    info!("eSight collector v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = CollectorConfig::load()
        .await
        .context("Failed to load configuration")?;

    let (trigger, shutdown) = shutdown::channel();
    shutdown::listen_for_signals(trigger);

    let platform = Arc::new(
        EsightClient::connect(&config.esight)
            .await
            .context("Failed to authenticate on eSight")?,
    );

    let broker = resolve_broker(&config.mqtt)
        .await
        .context("Failed to resolve MQTT broker")?;
    let publisher = Arc::new(MqttPublisher::start(&config.mqtt, broker));

    let mut collector = Collector::new(platform, publisher.clone(), &config);

    let discovery = collector.register_until(shutdown.clone()).await;
    if collector.registry().is_empty() && !discovery.interrupted {
        warn!("No tasks registered, snapshots will stay empty");
    }
    info!(
        "{} tasks registered from {} interfaces and {} slots",
        collector.registry().len(),
        discovery.interfaces_seen,
        discovery.slots_seen
    );

    let cycles = collector.run(shutdown).await;
    info!("Polling stopped after {} cycles", cycles);

    collector.teardown().await;
    publisher.shutdown().await;

    info!("eSight collector stopped");
    Ok(())
}
