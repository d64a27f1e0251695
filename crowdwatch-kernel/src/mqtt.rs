use crate::config::MqttConf;
use crate::contracts::ContractRegistry;
use crate::dispatch::{DeliveryReport, NotificationDispatcher, Publisher};
use crate::health::HealthTracker;
use crate::models::ZoneSnapshot;
use crate::stats::MqttStatsFeed;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use std::time::Duration;
use tokio::task;
use tracing::{debug, info, warn};

pub mod topics {
    pub const ZONE_STATS: &str = "crowdwatch/zones/stats@v1";
    pub const DISPATCH: &str = "crowdwatch/notifications/dispatch@v1";
    pub const DELIVERY: &str = "crowdwatch/notifications/delivery@v1";
    pub const INSIGHTS: &str = "crowdwatch/insights/published@v1";
    pub const HEALTH: &str = "crowdwatch/kernel/health@v1";
}

pub fn create_mqtt_client(cfg: &MqttConf) -> (AsyncClient, EventLoop) {
    let mut opts = MqttOptions::new(&cfg.client_id, &cfg.host, cfg.port);
    opts.set_keep_alive(Duration::from_secs(15));
    AsyncClient::new(opts, 10)
}

#[derive(Debug, thiserror::Error)]
pub enum InboundError {
    #[error("unexpected topic {0}")]
    UnexpectedTopic(String),
    #[error(transparent)]
    Contract(#[from] crate::contracts::ContractError),
    #[error("payload does not decode: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Dispatch(#[from] crate::dispatch::DispatchError),
}

/// Where inbound messages go.
#[derive(Clone)]
pub struct Inbound<P: Publisher> {
    pub contracts: ContractRegistry,
    pub stats_feed: Option<MqttStatsFeed>,
    pub dispatcher: NotificationDispatcher<P>,
}

impl<P: Publisher> Inbound<P> {
    pub fn handle(&self, topic: &str, payload: &[u8]) -> Result<(), InboundError> {
        let value = self.contracts.validate_message(topic, payload)?;
        match topic {
            topics::ZONE_STATS => {
                let snapshot: ZoneSnapshot = serde_json::from_value(value)?;
                match &self.stats_feed {
                    Some(feed) => feed.push(snapshot),
                    None => debug!("[mqtt] zone stats ignored, stats source is not mqtt"),
                }
                Ok(())
            }
            topics::DELIVERY => {
                let report: DeliveryReport = serde_json::from_value(value)?;
                self.dispatcher.apply_delivery(&report)?;
                Ok(())
            }
            other => Err(InboundError::UnexpectedTopic(other.to_string())),
        }
    }
}

pub fn spawn_mqtt_listener<P: Publisher>(
    client: AsyncClient,
    mut eventloop: EventLoop,
    inbound: Inbound<P>,
    health: HealthTracker,
) {
    task::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    health.mark_mqtt_connected();
                    info!("[mqtt] connected");
                    // subscriptions are lost with a clean session, redo them on every connect
                    for topic in [topics::ZONE_STATS, topics::DELIVERY] {
                        if let Err(e) = client.subscribe(topic, QoS::AtLeastOnce).await {
                            warn!("[mqtt] subscribe {topic} failed: {e:?}");
                        }
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    if let Err(e) = inbound.handle(&p.topic, &p.payload) {
                        warn!("[mqtt] dropped message on {}: {e}", p.topic);
                    }
                }
                Ok(Event::Incoming(Incoming::Disconnect)) => health.mark_mqtt_disconnected(),
                Ok(_) => {}
                Err(e) => {
                    warn!("[mqtt] connection error: {e:?}");
                    health.increment_reconnects();
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}
