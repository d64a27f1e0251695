/**
 * ZONE STATS - Where zone metrics come from
 *
 * ROLE:
 * The engine never fetches anything; a `StatsProvider` hands it snapshots.
 * Three providers: a fixed demo snapshot, a JSON file re-read on each poll,
 * and a feed filled by the MQTT listener.
 *
 * HOW IT WORKS:
 * - One poller task asks the provider for a snapshot at a fixed interval
 * - The snapshot goes into the `SnapshotCell` (older captures are dropped)
 * - The engine runs on it; non-empty results go out on
 *   crowdwatch/insights/published@v1 when enabled
 */

use crate::engine;
use crate::health::HealthTracker;
use crate::dispatch::Publisher;
use crate::models::{InsightSummary, NotificationSettings, RecommendationInsight, ZoneSnapshot, ZoneStat};
use crate::mqtt::topics;
use crate::state::{Shared, SnapshotCell};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task;
use tracing::{debug, info, warn};

const DEMO_SNAPSHOT: &str = include_str!("../zones.demo.json");

#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("No zone stats received yet")]
    NoData,
    #[error("Invalid snapshot: {0}")]
    Invalid(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub trait StatsProvider: Send + Sync {
    fn snapshot(&self) -> Result<ZoneSnapshot, StatsError>;

    fn name(&self) -> &'static str;
}

/// Same zones on every call, stamped with the time of the call.
pub struct StaticStatsProvider {
    venue_id: Option<String>,
    zones: Vec<ZoneStat>,
}

impl StaticStatsProvider {
    pub fn new(venue_id: Option<String>, zones: Vec<ZoneStat>) -> Self {
        Self { venue_id, zones }
    }

    pub fn demo() -> Result<Self, StatsError> {
        let snapshot: ZoneSnapshot = serde_json::from_str(DEMO_SNAPSHOT)?;
        Ok(Self::new(snapshot.venue_id, snapshot.zones))
    }
}

impl StatsProvider for StaticStatsProvider {
    fn snapshot(&self) -> Result<ZoneSnapshot, StatsError> {
        Ok(ZoneSnapshot {
            venue_id: self.venue_id.clone(),
            captured_at: OffsetDateTime::now_utc(),
            zones: self.zones.clone(),
        })
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Reads a `ZoneSnapshot` JSON file, e.g. one written by an external counter.
pub struct FileStatsProvider {
    path: PathBuf,
}

impl FileStatsProvider {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl StatsProvider for FileStatsProvider {
    fn snapshot(&self) -> Result<ZoneSnapshot, StatsError> {
        let txt = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&txt)?)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// Snapshots pushed by the MQTT listener.
#[derive(Clone, Default)]
pub struct MqttStatsFeed {
    latest: SnapshotCell,
}

impl MqttStatsFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, snapshot: ZoneSnapshot) {
        if !self.latest.store(snapshot) {
            debug!("[stats] out-of-order snapshot dropped");
        }
    }
}

impl StatsProvider for MqttStatsFeed {
    fn snapshot(&self) -> Result<ZoneSnapshot, StatsError> {
        self.latest.latest().ok_or(StatsError::NoData)
    }

    fn name(&self) -> &'static str {
        "mqtt"
    }
}

/// Payload of crowdwatch/insights/published@v1.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedInsights<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venue_id: Option<&'a str>,
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    pub insights: &'a [RecommendationInsight],
    pub summary: InsightSummary,
}

/// One poll: fetch, keep if newest, evaluate. Returns the stored snapshot
/// with its insights, or `None` when the provider's snapshot was stale.
pub fn poll_once(
    provider: &dyn StatsProvider,
    cell: &SnapshotCell,
    settings: &Shared<NotificationSettings>,
) -> Result<Option<(ZoneSnapshot, Vec<RecommendationInsight>)>, StatsError> {
    let snapshot = provider.snapshot()?;
    if !cell.store(snapshot.clone()) {
        return Ok(None);
    }
    let settings = settings.lock().clone();
    // evaluated at capture time so insight ids stay stable for one snapshot
    let insights = engine::evaluate_at(&snapshot.zones, &settings, snapshot.captured_at);
    Ok(Some((snapshot, insights)))
}

pub fn spawn_stats_poller<P: Publisher>(
    provider: Arc<dyn StatsProvider>,
    cell: SnapshotCell,
    settings: Shared<NotificationSettings>,
    publisher: Option<P>,
    health: HealthTracker,
    every: Duration,
) {
    info!("[stats] polling {} source every {:?}", provider.name(), every);

    task::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;

            let (snapshot, insights) = match poll_once(provider.as_ref(), &cell, &settings) {
                Ok(Some(result)) => result,
                Ok(None) => continue,
                Err(StatsError::NoData) => {
                    debug!("[stats] waiting for first snapshot");
                    continue;
                }
                Err(e) => {
                    warn!("[stats] {} source failed: {e}", provider.name());
                    continue;
                }
            };
            health.record_cycle(insights.len());
            debug!("[stats] {} zones -> {} insights", snapshot.zones.len(), insights.len());

            let Some(publisher) = publisher.as_ref() else { continue };
            if insights.is_empty() {
                continue;
            }
            let message = PublishedInsights {
                venue_id: snapshot.venue_id.as_deref(),
                captured_at: snapshot.captured_at,
                insights: &insights,
                summary: InsightSummary::from_insights(&insights),
            };
            let payload = match serde_json::to_vec(&message) {
                Ok(p) => p,
                Err(e) => {
                    warn!("[stats] failed to encode insights: {e}");
                    continue;
                }
            };
            if let Err(e) = publisher.publish_json(topics::INSIGHTS, payload).await {
                warn!("[stats] failed to publish insights: {e:#}");
            }
        }
    });
}
