use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::OffsetDateTime;

/// Per-zone crowd metrics as delivered by a stats source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneStat {
    pub zone_id: String,
    pub zone_name: String,
    pub occupancy: u32,
    pub capacity: u32,
    /// people per minute
    pub traffic_flow: f64,
    /// minutes
    pub dwell_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub busyness_level: Option<BusynessLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<Trend>,
}

impl ZoneStat {
    /// Occupancy as a percentage of capacity.
    ///
    /// A zone with no capacity but people inside is unbounded (`+inf`);
    /// an empty zone with no capacity reads as 0 %.
    pub fn utilization_rate(&self) -> f64 {
        if self.capacity == 0 {
            return if self.occupancy == 0 { 0.0 } else { f64::INFINITY };
        }
        self.occupancy as f64 / self.capacity as f64 * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BusynessLevel {
    NotBusy,
    LittleBusy,
    VeryBusy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

/// One polling cycle worth of zone metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    pub zones: Vec<ZoneStat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thresholds {
    /// percentage
    pub occupancy_rate: f64,
    /// people per minute
    pub traffic_flow: f64,
    /// minutes
    pub dwell_time: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { occupancy_rate: 80.0, traffic_flow: 25.0, dwell_time: 10.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channels {
    pub whatsapp: bool,
    pub email: bool,
    pub sms: bool,
}

impl Channels {
    pub fn any(&self) -> bool {
        self.whatsapp || self.email || self.sms
    }

    /// Names of the enabled channels, in a stable order.
    pub fn enabled(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.whatsapp { out.push("whatsapp"); }
        if self.sms { out.push("sms"); }
        if self.email { out.push("email"); }
        out
    }
}

impl Default for Channels {
    fn default() -> Self {
        Self { whatsapp: true, email: true, sms: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneSettings {
    pub enabled: bool,
}

/// Operator-controlled alerting configuration, passed explicitly into every evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettings {
    pub enabled: bool,
    #[serde(default)]
    pub channels: Channels,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub zone_specific: HashMap<String, ZoneSettings>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            channels: Channels::default(),
            thresholds: Thresholds::default(),
            zone_specific: HashMap::new(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SettingsError {
    #[error("threshold {name} must be a finite, non-negative number (got {value})")]
    InvalidThreshold { name: &'static str, value: f64 },
}

impl NotificationSettings {
    /// Rejects thresholds the engine cannot compare against meaningfully.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let t = &self.thresholds;
        for (name, value) in [
            ("occupancyRate", t.occupancy_rate),
            ("trafficFlow", t.traffic_flow),
            ("dwellTime", t.dwell_time),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(SettingsError::InvalidThreshold { name, value });
            }
        }
        Ok(())
    }

    /// A zone is suppressed only when it is explicitly disabled.
    pub fn zone_enabled(&self, zone_id: &str) -> bool {
        self.zone_specific.get(zone_id).map(|z| z.enabled).unwrap_or(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightType {
    Occupancy,
    Traffic,
    Bottleneck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    /// Occupancy breakpoints: >= 95 critical, >= 85 warning, else info.
    pub fn for_utilization(rate: f64) -> Self {
        if rate >= 95.0 {
            Severity::Critical
        } else if rate >= 85.0 {
            Severity::Warning
        } else {
            Severity::Info
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

impl std::str::FromStr for InsightType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "occupancy" => Ok(InsightType::Occupancy),
            "traffic" => Ok(InsightType::Traffic),
            "bottleneck" => Ok(InsightType::Bottleneck),
            other => Err(format!("unknown insight type '{other}'")),
        }
    }
}

/// Alert produced by the recommendation engine; lives only as long as the
/// evaluation that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationInsight {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: InsightType,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub suggested_action: String,
    pub affected_zones: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub actionable: bool,
}

impl RecommendationInsight {
    /// Text proposed to the operator when this insight is sent to crew.
    pub fn dispatch_message(&self) -> String {
        format!("{}\n\nRecommended Action: {}", self.message, self.suggested_action)
    }
}

/// Counts per severity, for the dashboard badges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightSummary {
    pub info: usize,
    pub warning: usize,
    pub critical: usize,
}

impl InsightSummary {
    pub fn from_insights(insights: &[RecommendationInsight]) -> Self {
        insights.iter().fold(Self::default(), |mut acc, i| {
            match i.severity {
                Severity::Info => acc.info += 1,
                Severity::Warning => acc.warning += 1,
                Severity::Critical => acc.critical += 1,
            }
            acc
        })
    }
}
