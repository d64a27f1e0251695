/**
 * VENUE CATALOG - Typed venues, zones and insight templates
 *
 * ROLE:
 * Describes the venues the kernel monitors (stadiums, malls, airports,
 * concert halls), their zones, and the canned insights operators can pull up
 * for a given zone.
 *
 * HOW IT WORKS:
 * - Loaded once at boot from YAML (kernel.yaml `venues_path`, or the
 *   built-in catalog compiled into the binary)
 * - Every key is typed: venue kind and zone type are enums, templates must
 *   point at an existing venue/zone pair
 * - Lookups with an unknown venue or zone return an error, never an empty list
 */

use crate::models::{InsightType, RecommendationInsight, Severity};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use time::OffsetDateTime;
use tracing::info;

const BUILTIN_CATALOG: &str = include_str!("../venues.default.yaml");

#[derive(Debug, thiserror::Error)]
pub enum VenueError {
    #[error("Unknown venue: {0}")]
    UnknownVenue(String),
    #[error("Unknown zone '{zone}' in venue '{venue}'")]
    UnknownZone { venue: String, zone: String },
    #[error("Duplicate venue id: {0}")]
    DuplicateVenue(String),
    #[error("Duplicate zone id '{zone}' in venue '{venue}'")]
    DuplicateZone { venue: String, zone: String },
    #[error("Venue '{venue}' declares zero capacity{}", .zone.as_ref().map(|z| format!(" for zone '{z}'")).unwrap_or_default())]
    ZeroCapacity { venue: String, zone: Option<String> },
    #[error("Catalog parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueKind {
    Stadium,
    Mall,
    Airport,
    ConcertHall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneType {
    Entrance,
    Exit,
    Seating,
    Concourse,
    Facility,
    FoodCourt,
    Security,
    Parking,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase", deserialize = "snake_case"), deny_unknown_fields)]
pub struct Zone {
    pub id: String,
    pub name: String,
    pub zone_type: ZoneType,
    pub capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase", deserialize = "snake_case"), deny_unknown_fields)]
pub struct Venue {
    pub id: String,
    pub name: String,
    pub kind: VenueKind,
    pub location: String,
    pub capacity: u32,
    #[serde(default)]
    pub description: String,
    pub zones: Vec<Zone>,
}

impl Venue {
    pub fn zone(&self, zone_id: &str) -> Option<&Zone> {
        self.zones.iter().find(|z| z.id == zone_id)
    }
}

/// Canned insight attached to a venue zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InsightTemplate {
    #[serde(rename = "type")]
    pub kind: InsightType,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub suggested_action: String,
    pub affected_zones: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TemplateSet {
    venue: String,
    zone: String,
    insights: Vec<InsightTemplate>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogFile {
    venues: Vec<Venue>,
    #[serde(default)]
    templates: Vec<TemplateSet>,
}

#[derive(Debug, Clone)]
pub struct VenueCatalog {
    venues: Vec<Venue>,
    templates: HashMap<(String, String), Vec<InsightTemplate>>,
}

impl VenueCatalog {
    /// Catalog shipped with the kernel.
    pub fn builtin() -> Result<Self, VenueError> {
        Self::from_yaml(BUILTIN_CATALOG)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, VenueError> {
        let txt = std::fs::read_to_string(path.as_ref())?;
        let catalog = Self::from_yaml(&txt)?;
        info!(
            "[venues] loaded {} venues from {}",
            catalog.venues.len(),
            path.as_ref().display()
        );
        Ok(catalog)
    }

    pub fn from_yaml(txt: &str) -> Result<Self, VenueError> {
        let file: CatalogFile = serde_yaml::from_str(txt)?;

        check_venues(&file.venues)?;

        let mut catalog = Self { venues: file.venues, templates: HashMap::new() };
        for set in file.templates {
            catalog.zone(&set.venue, &set.zone)?;
            catalog
                .templates
                .entry((set.venue, set.zone))
                .or_default()
                .extend(set.insights);
        }
        Ok(catalog)
    }

    pub fn venues(&self) -> &[Venue] {
        &self.venues
    }

    pub fn venue(&self, venue_id: &str) -> Result<&Venue, VenueError> {
        self.venues
            .iter()
            .find(|v| v.id == venue_id)
            .ok_or_else(|| VenueError::UnknownVenue(venue_id.to_string()))
    }

    pub fn zone(&self, venue_id: &str, zone_id: &str) -> Result<&Zone, VenueError> {
        self.venue(venue_id)?.zone(zone_id).ok_or_else(|| VenueError::UnknownZone {
            venue: venue_id.to_string(),
            zone: zone_id.to_string(),
        })
    }

    /// Instantiates the zone's templates as insights stamped with `now`.
    /// A known zone without templates yields an empty list.
    pub fn venue_insights(
        &self,
        venue_id: &str,
        zone_id: &str,
        now: OffsetDateTime,
    ) -> Result<Vec<RecommendationInsight>, VenueError> {
        self.zone(venue_id, zone_id)?;
        let millis = now.unix_timestamp_nanos() / 1_000_000;

        let insights = self
            .templates
            .get(&(venue_id.to_string(), zone_id.to_string()))
            .map(|templates| {
                templates
                    .iter()
                    .enumerate()
                    .map(|(index, t)| RecommendationInsight {
                        id: format!("{venue_id}-{zone_id}-{millis}-{index}"),
                        kind: t.kind,
                        severity: t.severity,
                        title: t.title.clone(),
                        message: t.message.clone(),
                        suggested_action: t.suggested_action.clone(),
                        affected_zones: t.affected_zones.clone(),
                        timestamp: now,
                        actionable: true,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(insights)
    }
}

fn check_venues(venues: &[Venue]) -> Result<(), VenueError> {
    let mut seen = HashSet::new();
    for venue in venues {
        if !seen.insert(venue.id.as_str()) {
            return Err(VenueError::DuplicateVenue(venue.id.clone()));
        }
        if venue.capacity == 0 {
            return Err(VenueError::ZeroCapacity { venue: venue.id.clone(), zone: None });
        }
        let mut zone_ids = HashSet::new();
        for zone in &venue.zones {
            if !zone_ids.insert(zone.id.as_str()) {
                return Err(VenueError::DuplicateZone { venue: venue.id.clone(), zone: zone.id.clone() });
            }
            if zone.capacity == 0 {
                return Err(VenueError::ZeroCapacity {
                    venue: venue.id.clone(),
                    zone: Some(zone.id.clone()),
                });
            }
        }
    }
    Ok(())
}
