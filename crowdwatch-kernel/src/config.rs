use crate::models::NotificationSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{error, warn};

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct KernelConfig {
    pub http: HttpConf,
    pub mqtt: MqttConf,
    pub stats: StatsConf,
    pub notifications: NotificationSettings,
    pub venues_path: Option<PathBuf>,
    pub contacts_path: PathBuf,
    pub contracts_dir: PathBuf,
    pub publish_insights: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HttpConf {
    pub bind: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

fn default_client_id() -> String {
    "crowdwatch-kernel".into()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StatsConf {
    pub source: StatsSource,
    #[serde(default = "default_poll_secs")]
    pub poll_interval_secs: u64,
}

fn default_poll_secs() -> u64 {
    5
}

impl StatsConf {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

/// Where zone metrics come from.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatsSource {
    /// Demo snapshot compiled into the kernel.
    Static,
    /// A JSON snapshot file re-read on every poll (`ZoneSnapshot` format).
    File { path: PathBuf },
    /// Snapshots pushed on `crowdwatch/zones/stats@v1`.
    Mqtt,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            http: HttpConf { bind: "0.0.0.0:8080".into() },
            mqtt: MqttConf { host: "localhost".into(), port: 1883, client_id: default_client_id() },
            stats: StatsConf { source: StatsSource::Mqtt, poll_interval_secs: default_poll_secs() },
            notifications: NotificationSettings::default(),
            venues_path: None,
            contacts_path: PathBuf::from("./data/contacts.json"),
            contracts_dir: PathBuf::from("../contracts/mqtt"),
            publish_insights: true,
        }
    }
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("CROWDWATCH_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    load_config_from(&path).await
}

pub async fn load_config_from<P: AsRef<Path>>(path: P) -> KernelConfig {
    let path = path.as_ref();
    if !path.exists() {
        warn!("[config] no {} found, using defaults", path.display());
        return KernelConfig::default();
    }

    let txt = fs::read_to_string(path).await.unwrap_or_default();
    if txt.trim().is_empty() {
        warn!("[config] {} is empty, using defaults", path.display());
        return KernelConfig::default();
    }

    let cfg: KernelConfig = match serde_yaml::from_str(&txt) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("[config] invalid {}: {e}", path.display());
            return KernelConfig::default();
        }
    };

    if let Err(e) = cfg.notifications.validate() {
        error!("[config] notifications section rejected ({e}), using default settings");
        return KernelConfig { notifications: NotificationSettings::default(), ..cfg };
    }
    cfg
}
