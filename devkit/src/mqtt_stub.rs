/*!
Mock MQTT client for running without a broker.

Records every publish so tests can assert on what went out, and can be
switched offline to exercise publish failures.
*/

use anyhow::{bail, Result};
use parking_lot::Mutex;
use rumqttc::QoS;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Stands in for rumqttc::AsyncClient.
#[derive(Clone, Default)]
pub struct MockMqttClient {
    published_messages: Arc<Mutex<Vec<MockMessage>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    message_sender: Arc<Mutex<Option<mpsc::UnboundedSender<MockMessage>>>>,
    offline: Arc<AtomicBool>,
}

impl MockMqttClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every publish fails and nothing is recorded.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn setup_receiver(&self) -> mpsc::UnboundedReceiver<MockMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.message_sender.lock() = Some(sender);
        receiver
    }

    pub async fn publish<S, V>(&self, topic: S, qos: QoS, retain: bool, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let topic = topic.into();
        if self.offline.load(Ordering::SeqCst) {
            bail!("mock broker offline, publish to {topic} refused");
        }
        let message = MockMessage { topic, payload: payload.into(), qos, retain };
        log::info!("[mock] published to {}: {} bytes", message.topic, message.payload.len());
        self.published_messages.lock().push(message);
        Ok(())
    }

    pub async fn subscribe<S: Into<String>>(&self, topic: S, _qos: QoS) -> Result<()> {
        let topic = topic.into();
        log::info!("[mock] subscribed to {}", topic);
        self.subscriptions.lock().push(topic);
        Ok(())
    }

    /// Delivers a message to the receiver set up with `setup_receiver`.
    pub async fn simulate_incoming<S, V>(&self, topic: S, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = MockMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtLeastOnce,
            retain: false,
        };
        if let Some(sender) = self.message_sender.lock().as_ref() {
            sender
                .send(message.clone())
                .map_err(|e| anyhow::anyhow!("send error: {}", e))?;
        }
        log::info!("[mock] simulated incoming: {}", message.topic);
        Ok(())
    }

    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.published_messages.lock().clone()
    }

    pub fn get_subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }

    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.published_messages
            .lock()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Decodes the last message published on a topic.
    pub fn get_last_json_message<T>(&self, topic: &str) -> Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        match self.find_messages_by_topic(topic).last() {
            Some(msg) => Ok(Some(serde_json::from_slice(&msg.payload)?)),
            None => Ok(None),
        }
    }

    pub fn clear(&self) {
        self.published_messages.lock().clear();
        self.subscriptions.lock().clear();
    }
}

/// Payloads shaped after the crowdwatch MQTT contracts.
pub struct CrowdMessageBuilder;

impl CrowdMessageBuilder {
    /// crowdwatch/zones/stats@v1
    pub fn zone_stats_v1(venue_id: &str, zones: Vec<Value>) -> Value {
        serde_json::json!({
            "venueId": venue_id,
            "capturedAt": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            "zones": zones
        })
    }

    /// One entry of `zones` in crowdwatch/zones/stats@v1.
    pub fn zone(zone_id: &str, zone_name: &str, occupancy: u32, capacity: u32, traffic_flow: f64, dwell_time: f64) -> Value {
        serde_json::json!({
            "zoneId": zone_id,
            "zoneName": zone_name,
            "occupancy": occupancy,
            "capacity": capacity,
            "trafficFlow": traffic_flow,
            "dwellTime": dwell_time
        })
    }

    /// crowdwatch/notifications/delivery@v1
    pub fn delivery_v1(notification_id: &str, recipient: &str, status: &str) -> Value {
        serde_json::json!({
            "notificationId": notification_id,
            "recipient": recipient,
            "status": status
        })
    }
}
