/*!
Zone fixtures for the Bukit Jalil stadium layout (same ids as the kernel's
built-in venue catalog).
*/

use crate::mqtt_stub::CrowdMessageBuilder;
use serde_json::Value;

pub const STADIUM_VENUE_ID: &str = "bukit-jalil";

/// (zone id, zone name, capacity)
pub const STADIUM_ZONES: [(&str, &str, u32); 5] = [
    ("gate-a", "Gate A", 2500),
    ("gate-b", "Gate B", 2500),
    ("concourse", "Concourse", 6000),
    ("seating", "Seating Area", 75000),
    ("south-exit", "South Exit", 1500),
];

fn zones_with(load: [(u32, f64, f64); 5]) -> Vec<Value> {
    STADIUM_ZONES
        .iter()
        .zip(load)
        .map(|((id, name, capacity), (occupancy, flow, dwell))| {
            CrowdMessageBuilder::zone(id, name, occupancy, *capacity, flow, dwell)
        })
        .collect()
}

/// Ordinary pre-match load: one busy gate, nothing over 80 % occupancy.
pub fn stadium_zones() -> Vec<Value> {
    zones_with([
        (1800, 30.0, 5.0),
        (900, 10.0, 2.0),
        (4200, 18.0, 12.0),
        (40000, 8.0, 3.0),
        (200, 2.0, 1.0),
    ])
}

/// Kick-off rush: four zones over 80 %, Gate A near capacity.
pub fn crowded_zones() -> Vec<Value> {
    zones_with([
        (2450, 62.0, 6.0),
        (2150, 35.0, 4.0),
        (5200, 20.0, 16.0),
        (61000, 12.0, 3.0),
        (300, 3.0, 1.0),
    ])
}

fn snapshot_of(captured_at: &str, zones: Vec<Value>) -> Value {
    serde_json::json!({
        "venueId": STADIUM_VENUE_ID,
        "capturedAt": captured_at,
        "zones": zones
    })
}

/// crowdwatch/zones/stats@v1 payload with `stadium_zones`.
pub fn snapshot(captured_at: &str) -> Value {
    snapshot_of(captured_at, stadium_zones())
}

/// crowdwatch/zones/stats@v1 payload with `crowded_zones`.
pub fn crowded_snapshot(captured_at: &str) -> Value {
    snapshot_of(captured_at, crowded_zones())
}
