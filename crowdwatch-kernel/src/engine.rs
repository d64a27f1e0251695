/**
 * RECOMMENDATION ENGINE - Threshold rules over zone metrics
 *
 * ROLE:
 * Turns the latest zone snapshot and the operator's notification settings
 * into the list of insights shown on the dashboard.
 *
 * HOW IT WORKS:
 * - Per zone, in input order: occupancy check, traffic check, dwell-time check
 * - Zones explicitly disabled in the settings are skipped
 * - One aggregate "multiple zones" insight when 3+ zones (unfiltered) breach
 *   the occupancy threshold
 * - Pure and synchronous; the only clock read is the `now` of `evaluate`
 *
 * SEVERITY TIERS (kept as operated):
 * - occupancy: critical >= 95 %, warning >= 85 %, info otherwise
 * - traffic:   critical >= 50 people/min, warning otherwise
 * - dwell:     warning >= 15 min, info otherwise
 */

use crate::models::{
    InsightType, NotificationSettings, RecommendationInsight, Severity, ZoneSnapshot, ZoneStat,
};
use crate::venues::Venue;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, warn};

const TRAFFIC_CRITICAL_FLOW: f64 = 50.0;
const DWELL_WARNING_MINUTES: f64 = 15.0;
const MULTI_ZONE_MIN: usize = 3;

/// Evaluates the snapshot against the settings at the current instant.
pub fn evaluate(zone_stats: &[ZoneStat], settings: &NotificationSettings) -> Vec<RecommendationInsight> {
    evaluate_at(zone_stats, settings, OffsetDateTime::now_utc())
}

/// Same as [`evaluate`] with an explicit clock, so two calls at the same
/// instant produce identical output.
pub fn evaluate_at(
    zone_stats: &[ZoneStat],
    settings: &NotificationSettings,
    now: OffsetDateTime,
) -> Vec<RecommendationInsight> {
    if !settings.enabled || zone_stats.is_empty() {
        return Vec::new();
    }

    let millis = unix_millis(now);
    let thresholds = &settings.thresholds;
    let mut insights = Vec::new();

    for zone in zone_stats {
        if !settings.zone_enabled(&zone.zone_id) {
            debug!(zone = %zone.zone_id, "[engine] zone suppressed by settings");
            continue;
        }

        let utilization = zone.utilization_rate();
        if utilization >= thresholds.occupancy_rate {
            insights.push(occupancy_insight(zone, utilization, millis, now));
        }

        if zone.traffic_flow >= thresholds.traffic_flow {
            let severity = if zone.traffic_flow >= TRAFFIC_CRITICAL_FLOW {
                Severity::Critical
            } else {
                Severity::Warning
            };
            insights.push(RecommendationInsight {
                id: format!("traffic-{}-{}", zone.zone_id, millis),
                kind: InsightType::Traffic,
                severity,
                title: format!("High Traffic Flow in {}", zone.zone_name),
                message: format!(
                    "Traffic flow is {} people/min. Monitor for potential bottlenecks.",
                    zone.traffic_flow.round()
                ),
                suggested_action: format!(
                    "Increase staff presence in {} and prepare crowd redirection if needed.",
                    zone.zone_name
                ),
                affected_zones: vec![zone.zone_name.clone()],
                timestamp: now,
                actionable: true,
            });
        }

        if zone.dwell_time >= thresholds.dwell_time {
            let severity = if zone.dwell_time >= DWELL_WARNING_MINUTES {
                Severity::Warning
            } else {
                Severity::Info
            };
            insights.push(RecommendationInsight {
                id: format!("dwell-{}-{}", zone.zone_id, millis),
                kind: InsightType::Bottleneck,
                severity,
                title: format!("Extended Dwell Time in {}", zone.zone_name),
                message: format!(
                    "Average dwell time is {:.1} minutes. Potential bottleneck detected.",
                    round_half_up_tenths(zone.dwell_time)
                ),
                suggested_action: format!(
                    "Investigate cause of delays in {} and implement flow optimization measures.",
                    zone.zone_name
                ),
                affected_zones: vec![zone.zone_name.clone()],
                timestamp: now,
                actionable: true,
            });
        }
    }

    // counted over every zone, disabled ones included
    let crowded: Vec<&ZoneStat> = zone_stats
        .iter()
        .filter(|z| z.utilization_rate() >= thresholds.occupancy_rate)
        .collect();

    if crowded.len() >= MULTI_ZONE_MIN {
        insights.push(RecommendationInsight {
            id: format!("multi-zone-{}", millis),
            kind: InsightType::Traffic,
            severity: Severity::Critical,
            title: "Multiple High-Traffic Zones Detected".to_string(),
            message: format!(
                "{} zones are experiencing high traffic simultaneously.",
                crowded.len()
            ),
            suggested_action: "Activate emergency crowd management protocol and coordinate staff deployment across affected areas.".to_string(),
            affected_zones: crowded.iter().map(|z| z.zone_name.clone()).collect(),
            timestamp: now,
            actionable: true,
        });
    }

    insights
}

fn occupancy_insight(
    zone: &ZoneStat,
    utilization: f64,
    millis: i128,
    now: OffsetDateTime,
) -> RecommendationInsight {
    let shown = if utilization.is_finite() {
        format!("{}%", utilization.round())
    } else {
        warn!(
            zone = %zone.zone_id,
            occupancy = zone.occupancy,
            "[engine] zone reports zero capacity, treating utilization as unbounded"
        );
        "unbounded".to_string()
    };

    RecommendationInsight {
        id: format!("occupancy-{}-{}", zone.zone_id, millis),
        kind: InsightType::Occupancy,
        severity: Severity::for_utilization(utilization),
        title: format!("High Occupancy in {}", zone.zone_name),
        message: format!(
            "Current occupancy is {} ({}/{}). Consider crowd control measures.",
            shown, zone.occupancy, zone.capacity
        ),
        suggested_action: format!(
            "Deploy additional staff to {} to manage crowd flow and prevent overcrowding.",
            zone.zone_name
        ),
        affected_zones: vec![zone.zone_name.clone()],
        timestamp: now,
        actionable: true,
    }
}

/// One decimal, halves rounded away from zero (`{:.1}` alone rounds them to even).
fn round_half_up_tenths(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn unix_millis(now: OffsetDateTime) -> i128 {
    now.unix_timestamp_nanos() / 1_000_000
}

/// Venue-wide rollup shown on the venue overview card.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedInsight {
    pub id: String,
    pub venue_id: String,
    pub venue_name: String,
    /// e.g. "116% (163/140)"
    pub overall_occupancy: String,
    pub key_action: String,
    pub affected_zones: Vec<String>,
    pub severity: Severity,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Rolls the venue's zones of a snapshot into one overview insight.
/// Returns `None` when the snapshot holds no zone of this venue.
pub fn aggregate_venue(
    venue: &Venue,
    snapshot: &ZoneSnapshot,
    settings: &NotificationSettings,
    now: OffsetDateTime,
) -> Option<AggregatedInsight> {
    let zones: Vec<ZoneStat> = snapshot
        .zones
        .iter()
        .filter(|z| venue.zone(&z.zone_id).is_some())
        .cloned()
        .collect();
    if zones.is_empty() {
        return None;
    }

    let occupancy: u64 = zones.iter().map(|z| z.occupancy as u64).sum();
    let capacity: u64 = zones.iter().map(|z| z.capacity as u64).sum();
    let rate = if capacity == 0 {
        if occupancy == 0 { 0.0 } else { f64::INFINITY }
    } else {
        occupancy as f64 / capacity as f64 * 100.0
    };
    let shown = if rate.is_finite() {
        format!("{}% ({}/{})", rate.round(), occupancy, capacity)
    } else {
        format!("unbounded ({}/{})", occupancy, capacity)
    };

    let affected_zones = zones
        .iter()
        .filter(|z| z.utilization_rate() >= settings.thresholds.occupancy_rate)
        .map(|z| z.zone_name.clone())
        .collect();

    // first of the most severe insights wins, keeping input order on ties
    let key_action = evaluate_at(&zones, settings, now)
        .into_iter()
        .fold(None::<RecommendationInsight>, |best, i| match best {
            Some(b) if b.severity >= i.severity => Some(b),
            _ => Some(i),
        })
        .map(|i| i.suggested_action)
        .unwrap_or_else(|| "Continue monitoring crowd levels".to_string());

    Some(AggregatedInsight {
        id: format!("{}-aggregate-{}", venue.id, unix_millis(now)),
        venue_id: venue.id.clone(),
        venue_name: venue.name.clone(),
        overall_occupancy: shown,
        key_action,
        affected_zones,
        severity: Severity::for_utilization(rate),
        timestamp: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Thresholds, ZoneSettings};
    use crate::venues::VenueCatalog;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2025-03-14 19:30:00 UTC);

    fn zone(id: &str, name: &str, occupancy: u32, capacity: u32, flow: f64, dwell: f64) -> ZoneStat {
        ZoneStat {
            zone_id: id.into(),
            zone_name: name.into(),
            occupancy,
            capacity,
            traffic_flow: flow,
            dwell_time: dwell,
            busyness_level: None,
            trend: None,
        }
    }

    fn settings() -> NotificationSettings {
        NotificationSettings {
            thresholds: Thresholds { occupancy_rate: 80.0, traffic_flow: 25.0, dwell_time: 10.0 },
            ..NotificationSettings::default()
        }
    }

    #[test]
    fn test_disabled_settings_yield_nothing() {
        let mut s = settings();
        s.enabled = false;
        let zones = vec![zone("z1", "Gate A", 200, 200, 90.0, 30.0)];
        assert!(evaluate_at(&zones, &s, NOW).is_empty());
    }

    #[test]
    fn test_empty_snapshot_yields_nothing() {
        assert!(evaluate_at(&[], &settings(), NOW).is_empty());
    }

    #[test]
    fn test_all_thresholds_unmet() {
        let zones = vec![
            zone("z1", "Gate A", 10, 200, 5.0, 2.0),
            zone("z2", "Concourse", 100, 200, 24.9, 9.9),
        ];
        assert!(evaluate_at(&zones, &settings(), NOW).is_empty());
    }

    #[test]
    fn test_two_zone_example() {
        let zones = vec![
            zone("z1", "Gate A", 190, 200, 10.0, 5.0),
            zone("z2", "Food Court", 50, 200, 60.0, 20.0),
        ];
        let insights = evaluate_at(&zones, &settings(), NOW);
        assert_eq!(insights.len(), 3);

        assert_eq!(insights[0].kind, InsightType::Occupancy);
        assert_eq!(insights[0].severity, Severity::Critical);
        assert_eq!(insights[0].affected_zones, vec!["Gate A"]);
        assert_eq!(
            insights[0].message,
            "Current occupancy is 95% (190/200). Consider crowd control measures."
        );

        assert_eq!(insights[1].kind, InsightType::Traffic);
        assert_eq!(insights[1].severity, Severity::Critical);
        assert_eq!(insights[1].message, "Traffic flow is 60 people/min. Monitor for potential bottlenecks.");

        assert_eq!(insights[2].kind, InsightType::Bottleneck);
        assert_eq!(insights[2].severity, Severity::Warning);
        assert_eq!(insights[2].message, "Average dwell time is 20.0 minutes. Potential bottleneck detected.");
        assert!(insights.iter().all(|i| i.actionable && i.timestamp == NOW));
    }

    #[test]
    fn test_occupancy_severity_tiers() {
        let cases = [(160, Severity::Info), (170, Severity::Warning), (189, Severity::Warning), (190, Severity::Critical)];
        for (occupancy, expected) in cases {
            let insights = evaluate_at(&[zone("z", "Hall", occupancy, 200, 0.0, 0.0)], &settings(), NOW);
            assert_eq!(insights.len(), 1, "occupancy {occupancy}");
            assert_eq!(insights[0].severity, expected, "occupancy {occupancy}");
        }
    }

    #[test]
    fn test_traffic_has_no_info_tier() {
        let insights = evaluate_at(&[zone("z", "Hall", 0, 200, 25.0, 0.0)], &settings(), NOW);
        assert_eq!(insights[0].severity, Severity::Warning);
        let insights = evaluate_at(&[zone("z", "Hall", 0, 200, 50.0, 0.0)], &settings(), NOW);
        assert_eq!(insights[0].severity, Severity::Critical);
    }

    #[test]
    fn test_dwell_has_no_critical_tier() {
        for (dwell, expected) in [
            (10.0, Severity::Info),
            (14.9, Severity::Info),
            (15.0, Severity::Warning),
            (120.0, Severity::Warning),
        ] {
            let insights = evaluate_at(&[zone("z", "Hall", 0, 200, 0.0, dwell)], &settings(), NOW);
            assert_eq!(insights[0].severity, expected, "dwell {dwell}");
        }
    }

    #[test]
    fn test_dwell_message_rounds_ties_up() {
        for (dwell, shown) in [(12.25, "12.3"), (10.05, "10.1"), (10.04, "10.0"), (20.0, "20.0")] {
            let insights = evaluate_at(&[zone("z", "Hall", 0, 200, 0.0, dwell)], &settings(), NOW);
            assert_eq!(
                insights[0].message,
                format!("Average dwell time is {shown} minutes. Potential bottleneck detected.")
            );
        }
    }

    #[test]
    fn test_per_zone_order_is_occupancy_traffic_dwell() {
        let zones = vec![
            zone("a", "North", 199, 200, 40.0, 12.0),
            zone("b", "South", 0, 200, 30.0, 0.0),
        ];
        let kinds: Vec<(InsightType, String)> = evaluate_at(&zones, &settings(), NOW)
            .into_iter()
            .map(|i| (i.kind, i.affected_zones[0].clone()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (InsightType::Occupancy, "North".to_string()),
                (InsightType::Traffic, "North".to_string()),
                (InsightType::Bottleneck, "North".to_string()),
                (InsightType::Traffic, "South".to_string()),
            ]
        );
    }

    #[test]
    fn test_disabled_zone_suppressed_but_counted_in_aggregate() {
        let mut s = settings();
        s.zone_specific.insert("b".into(), ZoneSettings { enabled: false });
        let zones = vec![
            zone("a", "Gate A", 180, 200, 60.0, 0.0),
            zone("b", "Gate B", 180, 200, 60.0, 20.0),
            zone("c", "Gate C", 180, 200, 0.0, 0.0),
        ];
        let insights = evaluate_at(&zones, &s, NOW);

        let per_zone: Vec<&RecommendationInsight> =
            insights.iter().filter(|i| !i.id.starts_with("multi-zone")).collect();
        assert!(per_zone.iter().all(|i| i.affected_zones != vec!["Gate B"]));

        let aggregate = insights.last().unwrap();
        assert_eq!(aggregate.id, format!("multi-zone-{}", unix_millis(NOW)));
        assert_eq!(aggregate.kind, InsightType::Traffic);
        assert_eq!(aggregate.severity, Severity::Critical);
        assert_eq!(aggregate.affected_zones, vec!["Gate A", "Gate B", "Gate C"]);
        assert_eq!(aggregate.message, "3 zones are experiencing high traffic simultaneously.");
    }

    #[test]
    fn test_aggregate_needs_three_zones() {
        let zones = vec![
            zone("a", "Gate A", 180, 200, 0.0, 0.0),
            zone("b", "Gate B", 180, 200, 0.0, 0.0),
        ];
        let insights = evaluate_at(&zones, &settings(), NOW);
        assert_eq!(insights.len(), 2);
        assert!(insights.iter().all(|i| i.kind == InsightType::Occupancy));
    }

    #[test]
    fn test_aggregate_emitted_even_when_all_zones_disabled() {
        let mut s = settings();
        for id in ["a", "b", "c"] {
            s.zone_specific.insert(id.into(), ZoneSettings { enabled: false });
        }
        let zones = vec![
            zone("a", "A", 200, 200, 0.0, 0.0),
            zone("b", "B", 200, 200, 0.0, 0.0),
            zone("c", "C", 200, 200, 0.0, 0.0),
        ];
        let insights = evaluate_at(&zones, &s, NOW);
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].affected_zones, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_ids_are_unique_within_a_call() {
        let zones = vec![
            zone("a", "A", 200, 200, 60.0, 20.0),
            zone("b", "B", 200, 200, 60.0, 20.0),
            zone("c", "C", 200, 200, 60.0, 20.0),
        ];
        let insights = evaluate_at(&zones, &settings(), NOW);
        let mut ids: Vec<&str> = insights.iter().map(|i| i.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), insights.len());
        assert_eq!(insights[0].id, format!("occupancy-a-{}", unix_millis(NOW)));
        assert_eq!(insights[2].id, format!("dwell-a-{}", unix_millis(NOW)));
    }

    #[test]
    fn test_same_instant_is_idempotent() {
        let zones = vec![zone("a", "A", 170, 200, 30.0, 11.0)];
        assert_eq!(evaluate_at(&zones, &settings(), NOW), evaluate_at(&zones, &settings(), NOW));
    }

    #[test]
    fn test_zero_capacity_is_unbounded_critical() {
        let insights = evaluate_at(&[zone("z", "Annex", 12, 0, 0.0, 0.0)], &settings(), NOW);
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].severity, Severity::Critical);
        assert_eq!(
            insights[0].message,
            "Current occupancy is unbounded (12/0). Consider crowd control measures."
        );

        assert!(evaluate_at(&[zone("z", "Annex", 0, 0, 0.0, 0.0)], &settings(), NOW).is_empty());
    }

    #[test]
    fn test_aggregate_venue_rollup() {
        let catalog = VenueCatalog::builtin().unwrap();
        let venue = catalog.venue("bukit-jalil").unwrap();
        let snapshot = ZoneSnapshot {
            venue_id: Some("bukit-jalil".into()),
            captured_at: NOW,
            zones: vec![
                zone("gate-a", "Gate A", 190, 200, 10.0, 5.0),
                zone("concourse", "Concourse", 100, 200, 60.0, 0.0),
                zone("elsewhere", "Not In Venue", 999, 1, 0.0, 0.0),
            ],
        };
        let agg = aggregate_venue(venue, &snapshot, &settings(), NOW).unwrap();
        assert_eq!(agg.overall_occupancy, "73% (290/400)");
        assert_eq!(agg.severity, Severity::Info);
        assert_eq!(agg.affected_zones, vec!["Gate A"]);
        assert_eq!(
            agg.key_action,
            "Deploy additional staff to Gate A to manage crowd flow and prevent overcrowding."
        );
    }

    #[test]
    fn test_aggregate_venue_without_zones() {
        let catalog = VenueCatalog::builtin().unwrap();
        let venue = catalog.venue("klia").unwrap();
        let snapshot = ZoneSnapshot { venue_id: None, captured_at: NOW, zones: vec![zone("x", "X", 1, 1, 0.0, 0.0)] };
        assert!(aggregate_venue(venue, &snapshot, &settings(), NOW).is_none());
    }

    #[test]
    fn test_aggregate_venue_quiet_key_action() {
        let catalog = VenueCatalog::builtin().unwrap();
        let venue = catalog.venue("bukit-jalil").unwrap();
        let snapshot = ZoneSnapshot {
            venue_id: None,
            captured_at: NOW,
            zones: vec![zone("gate-a", "Gate A", 20, 200, 1.0, 1.0)],
        };
        let agg = aggregate_venue(venue, &snapshot, &settings(), NOW).unwrap();
        assert_eq!(agg.key_action, "Continue monitoring crowd levels");
        assert!(agg.affected_zones.is_empty());
    }
}
