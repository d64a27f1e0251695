/**
 * CROWDWATCH KERNEL - Entry point of the crowd monitoring server
 *
 * ROLE: Wires config, venue catalog, contacts, stats source, engine,
 * dispatch, MQTT and HTTP together.
 *
 * ARCHITECTURE: zone stats (static / file / MQTT) -> poller -> engine ->
 * insights (REST + MQTT feed) -> operator dispatch -> MQTT gateway.
 */

mod config;
mod contacts;
mod contracts;
mod dispatch;
mod engine;
mod health;
mod http;
mod models;
mod mqtt;
mod state;
mod stats;
mod venues;

use crate::config::{load_config, KernelConfig, StatsSource};
use crate::contacts::ContactBook;
use crate::contracts::ContractRegistry;
use crate::dispatch::NotificationDispatcher;
use crate::health::HealthTracker;
use crate::http::AppState;
use crate::mqtt::Inbound;
use crate::state::{new_state, SnapshotCell};
use crate::stats::{FileStatsProvider, MqttStatsFeed, StaticStatsProvider, StatsProvider};
use crate::venues::VenueCatalog;

use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg: KernelConfig = load_config().await;
    let settings = new_state(cfg.notifications.clone());

    let venues = match &cfg.venues_path {
        Some(path) => VenueCatalog::load(path),
        None => VenueCatalog::builtin(),
    }
    .context("venue catalog rejected")?;
    info!("[kernel] {} venues in catalog", venues.venues().len());

    let contracts = match ContractRegistry::load_contracts_from_dir(&cfg.contracts_dir).await {
        Ok(registry) => {
            info!("[kernel] loaded {} contracts", registry.list_contracts().len());
            registry
        }
        Err(e) => {
            warn!("[kernel] failed to load contracts from {}: {e}", cfg.contracts_dir.display());
            ContractRegistry::new()
        }
    };

    let contacts = Arc::new(
        ContactBook::open(&cfg.contacts_path)
            .with_context(|| format!("cannot open contacts at {}", cfg.contacts_path.display()))?,
    );

    let health_tracker = HealthTracker::new();
    let snapshots = SnapshotCell::new();

    let (mqtt_client, eventloop) = mqtt::create_mqtt_client(&cfg.mqtt);
    let dispatcher = NotificationDispatcher::new(mqtt_client.clone(), contacts.clone());

    let (provider, stats_feed): (Arc<dyn StatsProvider>, Option<MqttStatsFeed>) = match &cfg.stats.source {
        StatsSource::Static => (Arc::new(StaticStatsProvider::demo().context("demo snapshot")?) as Arc<dyn StatsProvider>, None),
        StatsSource::File { path } => (Arc::new(FileStatsProvider::new(path)) as Arc<dyn StatsProvider>, None),
        StatsSource::Mqtt => {
            let feed = MqttStatsFeed::new();
            (Arc::new(feed.clone()) as Arc<dyn StatsProvider>, Some(feed))
        }
    };

    let inbound = Inbound { contracts: contracts.clone(), stats_feed, dispatcher: dispatcher.clone() };
    mqtt::spawn_mqtt_listener(mqtt_client.clone(), eventloop, inbound, health_tracker.clone());

    stats::spawn_stats_poller(
        provider,
        snapshots.clone(),
        settings.clone(),
        cfg.publish_insights.then(|| mqtt_client.clone()),
        health_tracker.clone(),
        cfg.stats.poll_interval(),
    );

    health_tracker.spawn_health_publisher(mqtt_client.clone(), contracts.clone(), snapshots.clone());

    let api_key = std::env::var("CROWDWATCH_API_KEY").ok().filter(|k| !k.is_empty());
    if api_key.is_none() {
        warn!("[kernel] CROWDWATCH_API_KEY not set, every route except /health will answer 401");
    }

    let app_state = AppState {
        settings,
        snapshots,
        venues: Arc::new(venues),
        contacts,
        dispatcher,
        contracts,
        health_tracker,
        api_key,
    };
    let app = http::build_router(app_state);

    let listener = TcpListener::bind(cfg.http.bind.as_str())
        .await
        .with_context(|| format!("cannot bind {}", cfg.http.bind))?;
    info!("[kernel] listening on http://{}", cfg.http.bind);
    axum::serve(listener, app).await?;
    Ok(())
}
