//! Deterministic zone telemetry for local runs.
//!
//! Publishes a stadium snapshot on crowdwatch/zones/stats@v1 at a fixed
//! interval. Each zone follows its own smooth wave, so a run always walks
//! through quiet, busy and crowded phases in the same order. Dispatch
//! envelopes from the kernel are logged and acknowledged as delivered,
//! standing in for the messaging gateway.

use crowdwatch_devkit::fixtures::{STADIUM_VENUE_ID, STADIUM_ZONES};
use crowdwatch_devkit::CrowdMessageBuilder;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Deserialize;
use anyhow::Result;
use log::{debug, error, info, warn};
use std::f64::consts::TAU;
use tokio::time::{sleep, Duration};

const CLIENT_ID: &str = "crowdwatch-sim";
const ZONE_STATS_TOPIC: &str = "crowdwatch/zones/stats@v1";
const DISPATCH_TOPIC: &str = "crowdwatch/notifications/dispatch@v1";
const DELIVERY_TOPIC: &str = "crowdwatch/notifications/delivery@v1";

/// Ticks for one full wave.
const PERIOD_TICKS: f64 = 60.0;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DispatchEnvelope {
    id: String,
    recipients: Vec<Recipient>,
    message: String,
    channels: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Recipient {
    recipient: String,
}

/// Load of one zone at a tick: (occupancy, traffic flow, dwell time).
/// Occupancy swings between 30 % and 100 % of capacity; zones are phase
/// shifted so they peak one after another.
fn zone_load(zone_index: usize, capacity: u32, tick: u64) -> (u32, f64, f64) {
    let phase = TAU * (tick as f64 / PERIOD_TICKS) + zone_index as f64 * 0.9;
    let wave = (phase.sin() + 1.0) / 2.0; // 0..=1

    let occupancy = (capacity as f64 * (0.30 + 0.70 * wave)).round() as u32;
    let traffic_flow = (5.0 + 60.0 * wave).round();
    let dwell_time = ((2.0 + 16.0 * wave) * 10.0).round() / 10.0;
    (occupancy, traffic_flow, dwell_time)
}

fn stadium_snapshot(tick: u64) -> serde_json::Value {
    let zones = STADIUM_ZONES
        .iter()
        .enumerate()
        .map(|(i, (id, name, capacity))| {
            let (occupancy, flow, dwell) = zone_load(i, *capacity, tick);
            CrowdMessageBuilder::zone(id, name, occupancy, *capacity, flow, dwell)
        })
        .collect();
    CrowdMessageBuilder::zone_stats_v1(STADIUM_VENUE_ID, zones)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let host = std::env::var("CROWDWATCH_MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("CROWDWATCH_MQTT_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(1883);
    let every = std::env::var("CROWDWATCH_SIM_INTERVAL_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5u64);
    info!("starting simulator against {host}:{port}, one snapshot every {every}s");

    let mut mqttoptions = MqttOptions::new(CLIENT_ID, host, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

    let publisher = client.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(every));
        let mut tick = 0u64;
        loop {
            interval.tick().await;
            let snapshot = stadium_snapshot(tick);
            match publisher
                .publish(ZONE_STATS_TOPIC, QoS::AtLeastOnce, false, snapshot.to_string())
                .await
            {
                Ok(()) => debug!("tick {tick}: published {} zones", STADIUM_ZONES.len()),
                Err(e) => warn!("tick {tick}: publish failed: {e}"),
            }
            tick += 1;
        }
    });

    loop {
        match eventloop.poll().await {
            Ok(event) => {
                if let Err(e) = handle_event(event, &client).await {
                    error!("{e}");
                }
            }
            Err(e) => {
                warn!("MQTT connection error: {}. Reconnecting...", e);
                sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

async fn handle_event(event: Event, client: &AsyncClient) -> Result<()> {
    match event {
        Event::Incoming(Incoming::ConnAck(_)) => {
            // clean session: the broker forgot our subscription
            info!("connected, subscribing to {DISPATCH_TOPIC}");
            client.subscribe(DISPATCH_TOPIC, QoS::AtLeastOnce).await?;
        }
        Event::Incoming(Incoming::Publish(publish)) => {
            handle_message(&publish.topic, &publish.payload, client)
                .await
                .map_err(|e| anyhow::anyhow!("error handling message from {}: {e}", publish.topic))?;
        }
        _ => {}
    }
    Ok(())
}

async fn handle_message(topic: &str, payload: &[u8], client: &AsyncClient) -> Result<()> {
    match topic {
        DISPATCH_TOPIC => {
            let envelope: DispatchEnvelope = serde_json::from_slice(payload)?;
            info!(
                "dispatch {} via {} to {} recipient(s): {}",
                envelope.id,
                envelope.channels.join(","),
                envelope.recipients.len(),
                envelope.message.lines().next().unwrap_or_default()
            );
            for r in &envelope.recipients {
                let report = CrowdMessageBuilder::delivery_v1(&envelope.id, &r.recipient, "delivered");
                client
                    .publish(DELIVERY_TOPIC, QoS::AtLeastOnce, false, report.to_string())
                    .await?;
            }
        }
        other => warn!("unknown topic: {}", other),
    }
    Ok(())
}
