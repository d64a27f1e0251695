use crate::contracts::ContractRegistry;
use crate::dispatch::Publisher;
use crate::mqtt::topics;
use crate::state::SnapshotCell;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::task;
use tracing::{debug, warn};

const PUBLISH_EVERY: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub zones_tracked: u32,
    pub snapshot_age_seconds: Option<i64>,
    pub insights_last_cycle: u32,
    pub dispatches_sent: u32,
    pub contracts_loaded: u32,
    pub memory_usage_mb: f32,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_status: Arc<Mutex<String>>,
    insights_last_cycle: Arc<AtomicU32>,
    dispatches_sent: Arc<AtomicU32>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            mqtt_status: Arc::new(Mutex::new("connecting".to_string())),
            insights_last_cycle: Arc::new(AtomicU32::new(0)),
            dispatches_sent: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn mark_mqtt_disconnected(&self) {
        *self.mqtt_status.lock() = "disconnected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn record_cycle(&self, insights: usize) {
        self.insights_last_cycle.store(insights as u32, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self) {
        self.dispatches_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_health(&self, contracts: &ContractRegistry, snapshots: &SnapshotCell) -> KernelHealth {
        let latest = snapshots.latest();
        let now = OffsetDateTime::now_utc();

        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            zones_tracked: latest.as_ref().map_or(0, |s| s.zones.len() as u32),
            snapshot_age_seconds: latest.map(|s| (now - s.captured_at).whole_seconds().max(0)),
            insights_last_cycle: self.insights_last_cycle.load(Ordering::Relaxed),
            dispatches_sent: self.dispatches_sent.load(Ordering::Relaxed),
            contracts_loaded: contracts.list_contracts().len() as u32,
            memory_usage_mb: get_memory_usage_mb(),
            mqtt_status: self.mqtt_status.lock().clone(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
        }
    }

    /// Publishes kernel health on the bus every 30 s.
    pub fn spawn_health_publisher<P: Publisher>(
        &self,
        publisher: P,
        contracts: ContractRegistry,
        snapshots: SnapshotCell,
    ) {
        let tracker = self.clone();

        task::spawn(async move {
            let mut interval = tokio::time::interval(PUBLISH_EVERY);
            loop {
                interval.tick().await;
                let health = tracker.get_health(&contracts, &snapshots);
                let payload = match serde_json::to_vec(&health) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("[health] failed to encode: {e}");
                        continue;
                    }
                };
                match publisher.publish_json(topics::HEALTH, payload).await {
                    Ok(()) => debug!(
                        "[health] published (uptime: {}s, zones: {})",
                        health.uptime_seconds, health.zones_tracked
                    ),
                    Err(e) => warn!("[health] failed to publish: {e:#}"),
                }
            }
        });
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let kb = status
                .lines()
                .find(|l| l.starts_with("VmRSS:"))
                .and_then(|l| l.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok());
            if let Some(kb) = kb {
                return kb as f32 / 1024.0;
            }
        }
    }
    0.0
}
