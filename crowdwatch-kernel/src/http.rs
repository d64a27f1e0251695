/**
 * CROWDWATCH REST API - Operator surface of the kernel
 *
 * ROLE:
 * What the dashboard talks to: current insights, zone stats, venues,
 * notification settings, crew contacts and the dispatch button.
 *
 * HOW IT WORKS:
 * - Axum router with an x-api-key middleware on every route except /health
 * - Insights are recomputed from the latest snapshot on each request
 * - Handlers return `Result<Json<_>, StatusCode>`; module errors convert into
 *   status codes (400 validation, 404 unknown ids, 502 gateway publish failure)
 *
 * ROUTES:
 * - /health, /system/health
 * - /insights, /zones/stats
 * - /settings, /settings/zones/{zone_id}, /settings/channels
 * - /venues, /venues/{id}, /venues/{id}/aggregate,
 *   /venues/{id}/zones/{zone}/insights, /venues/{id}/zones/{zone}/crew
 * - /contacts, /contacts/{id}
 * - /dispatch, /dispatch/history
 * - /contracts, /contracts/{name}
 */

use crate::contacts::{Contact, ContactBook, ContactError, ContactGroup, ContactUpdate, NewContact};
use crate::contracts::{Contract, ContractError, ContractRegistry};
use crate::dispatch::{DispatchError, DispatchRequest, NotificationDispatcher, NotificationRecord, Publisher};
use crate::engine::{self, AggregatedInsight};
use crate::health::{HealthTracker, KernelHealth};
use crate::models::{
    Channels, InsightSummary, InsightType, NotificationSettings, RecommendationInsight, SettingsError,
    Severity, ZoneSettings, ZoneSnapshot, ZoneStat,
};
use crate::state::{Shared, SnapshotCell};
use crate::venues::{Venue, VenueCatalog, VenueError};
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{error, warn};

#[derive(Clone)]
pub struct AppState<P: Publisher> {
    pub settings: Shared<NotificationSettings>,
    pub snapshots: SnapshotCell,
    pub venues: Arc<VenueCatalog>,
    pub contacts: Arc<ContactBook>,
    pub dispatcher: NotificationDispatcher<P>,
    pub contracts: ContractRegistry,
    pub health_tracker: HealthTracker,
    /// From CROWDWATCH_API_KEY; `None` locks every protected route.
    pub api_key: Option<String>,
}

async fn require_api_key(State(expected): State<Option<String>>, req: Request, next: Next) -> Result<Response, StatusCode> {
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let Some(expected) = expected.filter(|k| !k.is_empty()) else {
        error!("[http] CROWDWATCH_API_KEY not set, API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        warn!("[http] rejected request to {} (bad api key)", req.uri().path());
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router<P: Publisher>(app_state: AppState<P>) -> Router {
    let api_key = app_state.api_key.clone();
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health::<P>))
        .route("/insights", get(list_insights::<P>))
        .route("/zones/stats", get(get_zone_stats::<P>))
        .route("/settings", get(get_settings::<P>).put(put_settings::<P>))
        .route("/settings/zones/{zone_id}", put(put_zone_setting::<P>))
        .route("/settings/channels", put(put_channels::<P>))
        .route("/venues", get(list_venues::<P>))
        .route("/venues/{id}", get(get_venue::<P>))
        .route("/venues/{id}/aggregate", get(get_venue_aggregate::<P>))
        .route("/venues/{id}/zones/{zone}/insights", get(get_zone_templates::<P>))
        .route("/venues/{id}/zones/{zone}/crew", get(get_zone_crew::<P>))
        .route("/contacts", get(list_contacts::<P>).post(add_contact::<P>))
        .route(
            "/contacts/{id}",
            get(get_contact::<P>).put(update_contact::<P>).delete(delete_contact::<P>),
        )
        .route("/dispatch", post(dispatch::<P>))
        .route("/dispatch/history", get(dispatch_history::<P>))
        .route("/contracts", get(list_contracts::<P>))
        .route("/contracts/{name}", get(get_contract::<P>))
        .with_state(app_state)
        .layer(middleware::from_fn_with_state(api_key, require_api_key))
}

impl From<SettingsError> for StatusCode {
    fn from(_: SettingsError) -> Self {
        StatusCode::BAD_REQUEST
    }
}

impl From<VenueError> for StatusCode {
    fn from(e: VenueError) -> Self {
        match e {
            VenueError::UnknownVenue(_) | VenueError::UnknownZone { .. } => StatusCode::NOT_FOUND,
            other => {
                error!("[http] venue catalog error: {other}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<ContactError> for StatusCode {
    fn from(e: ContactError) -> Self {
        match e {
            ContactError::NotFound(_) => StatusCode::NOT_FOUND,
            ContactError::Invalid(_) => StatusCode::BAD_REQUEST,
            other => {
                error!("[http] contact store error: {other}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<DispatchError> for StatusCode {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::NoRecipients | DispatchError::EmptyMessage | DispatchError::NoChannels => {
                StatusCode::BAD_REQUEST
            }
            DispatchError::UnknownNotification(_) | DispatchError::UnknownRecipient { .. } => {
                StatusCode::NOT_FOUND
            }
            DispatchError::Publish { .. } => StatusCode::BAD_GATEWAY,
            DispatchError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ContractError> for StatusCode {
    fn from(e: ContractError) -> Self {
        match e {
            ContractError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Insights of the latest snapshot, evaluated at its capture time.
fn current_insights<P: Publisher>(app: &AppState<P>) -> Vec<RecommendationInsight> {
    let Some(snapshot) = app.snapshots.latest() else { return Vec::new() };
    let settings = app.settings.lock().clone();
    engine::evaluate_at(&snapshot.zones, &settings, snapshot.captured_at)
}

// GET /system/health
async fn get_system_health<P: Publisher>(State(app): State<AppState<P>>) -> Json<KernelHealth> {
    Json(app.health_tracker.get_health(&app.contracts, &app.snapshots))
}

#[derive(Debug, Deserialize)]
struct InsightsQuery {
    severity: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Serialize)]
struct InsightsView {
    insights: Vec<RecommendationInsight>,
    /// counts over all current insights, before filtering
    summary: InsightSummary,
    notified: Vec<String>,
}

// GET /insights?severity=critical&type=traffic
async fn list_insights<P: Publisher>(
    State(app): State<AppState<P>>,
    Query(query): Query<InsightsQuery>,
) -> Result<Json<InsightsView>, StatusCode> {
    let severity: Option<Severity> = query
        .severity
        .map(|s| s.parse())
        .transpose()
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    let kind: Option<InsightType> = query
        .kind
        .map(|s| s.parse())
        .transpose()
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let all = current_insights(&app);
    let summary = InsightSummary::from_insights(&all);
    let notified_ids = app.dispatcher.notified_insights();

    let mut notified: Vec<String> = all
        .iter()
        .filter(|i| notified_ids.contains(&i.id))
        .map(|i| i.id.clone())
        .collect();
    notified.sort();

    let insights = all
        .into_iter()
        .filter(|i| severity.map_or(true, |s| i.severity == s))
        .filter(|i| kind.map_or(true, |k| i.kind == k))
        .collect();

    Ok(Json(InsightsView { insights, summary, notified }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ZoneView {
    #[serde(flatten)]
    stat: ZoneStat,
    /// `null` when the zone has people but no capacity
    utilization_rate: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ZoneStatsView {
    #[serde(skip_serializing_if = "Option::is_none")]
    venue_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    captured_at: OffsetDateTime,
    zones: Vec<ZoneView>,
}

// GET /zones/stats
async fn get_zone_stats<P: Publisher>(State(app): State<AppState<P>>) -> Result<Json<ZoneStatsView>, StatusCode> {
    let ZoneSnapshot { venue_id, captured_at, zones } = app.snapshots.latest().ok_or(StatusCode::NOT_FOUND)?;
    let zones = zones
        .into_iter()
        .map(|stat| {
            let rate = stat.utilization_rate();
            ZoneView { utilization_rate: rate.is_finite().then_some(rate), stat }
        })
        .collect();
    Ok(Json(ZoneStatsView { venue_id, captured_at, zones }))
}

// GET /settings
async fn get_settings<P: Publisher>(State(app): State<AppState<P>>) -> Json<NotificationSettings> {
    Json(app.settings.lock().clone())
}

// PUT /settings
async fn put_settings<P: Publisher>(
    State(app): State<AppState<P>>,
    Json(settings): Json<NotificationSettings>,
) -> Result<Json<NotificationSettings>, StatusCode> {
    settings.validate()?;
    *app.settings.lock() = settings.clone();
    Ok(Json(settings))
}

// PUT /settings/zones/{zone_id}
async fn put_zone_setting<P: Publisher>(
    State(app): State<AppState<P>>,
    Path(zone_id): Path<String>,
    Json(zone): Json<ZoneSettings>,
) -> Json<NotificationSettings> {
    let mut settings = app.settings.lock();
    settings.zone_specific.insert(zone_id, zone);
    Json(settings.clone())
}

// PUT /settings/channels
async fn put_channels<P: Publisher>(
    State(app): State<AppState<P>>,
    Json(channels): Json<Channels>,
) -> Json<NotificationSettings> {
    let mut settings = app.settings.lock();
    settings.channels = channels;
    Json(settings.clone())
}

// GET /venues
async fn list_venues<P: Publisher>(State(app): State<AppState<P>>) -> Json<Vec<Venue>> {
    Json(app.venues.venues().to_vec())
}

// GET /venues/{id}
async fn get_venue<P: Publisher>(
    State(app): State<AppState<P>>,
    Path(id): Path<String>,
) -> Result<Json<Venue>, StatusCode> {
    Ok(Json(app.venues.venue(&id)?.clone()))
}

// GET /venues/{id}/aggregate (null until a snapshot covers the venue)
async fn get_venue_aggregate<P: Publisher>(
    State(app): State<AppState<P>>,
    Path(id): Path<String>,
) -> Result<Json<Option<AggregatedInsight>>, StatusCode> {
    let venue = app.venues.venue(&id)?;
    let Some(snapshot) = app.snapshots.latest() else { return Ok(Json(None)) };
    let settings = app.settings.lock().clone();
    Ok(Json(engine::aggregate_venue(venue, &snapshot, &settings, snapshot.captured_at)))
}

// GET /venues/{id}/zones/{zone}/insights
async fn get_zone_templates<P: Publisher>(
    State(app): State<AppState<P>>,
    Path((id, zone)): Path<(String, String)>,
) -> Result<Json<Vec<RecommendationInsight>>, StatusCode> {
    Ok(Json(app.venues.venue_insights(&id, &zone, OffsetDateTime::now_utc())?))
}

// GET /venues/{id}/zones/{zone}/crew
async fn get_zone_crew<P: Publisher>(
    State(app): State<AppState<P>>,
    Path((id, zone)): Path<(String, String)>,
) -> Result<Json<Vec<Contact>>, StatusCode> {
    let zone = app.venues.zone(&id, &zone)?;
    Ok(Json(app.contacts.crew_for_zone(zone.zone_type)))
}

#[derive(Debug, Deserialize)]
struct ContactsQuery {
    group: Option<ContactGroup>,
}

// GET /contacts?group=security
async fn list_contacts<P: Publisher>(
    State(app): State<AppState<P>>,
    Query(query): Query<ContactsQuery>,
) -> Json<Vec<Contact>> {
    Json(app.contacts.list(query.group))
}

// POST /contacts
async fn add_contact<P: Publisher>(
    State(app): State<AppState<P>>,
    Json(new): Json<NewContact>,
) -> Result<(StatusCode, Json<Contact>), StatusCode> {
    Ok((StatusCode::CREATED, Json(app.contacts.add(new)?)))
}

// GET /contacts/{id}
async fn get_contact<P: Publisher>(
    State(app): State<AppState<P>>,
    Path(id): Path<String>,
) -> Result<Json<Contact>, StatusCode> {
    app.contacts.get(&id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

// PUT /contacts/{id}
async fn update_contact<P: Publisher>(
    State(app): State<AppState<P>>,
    Path(id): Path<String>,
    Json(update): Json<ContactUpdate>,
) -> Result<Json<Contact>, StatusCode> {
    Ok(Json(app.contacts.update(&id, update)?))
}

// DELETE /contacts/{id}
async fn delete_contact<P: Publisher>(
    State(app): State<AppState<P>>,
    Path(id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    app.contacts.delete(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

// POST /dispatch
async fn dispatch<P: Publisher>(
    State(app): State<AppState<P>>,
    Json(mut request): Json<DispatchRequest>,
) -> Result<Json<NotificationRecord>, StatusCode> {
    // a blank message on an insight dispatch gets the insight's proposed text
    if request.message.trim().is_empty() {
        if let Some(insight_id) = &request.insight_id {
            if let Some(insight) = current_insights(&app).into_iter().find(|i| &i.id == insight_id) {
                request.message = insight.dispatch_message();
            }
        }
    }

    let channels = app.settings.lock().channels;
    let record = app.dispatcher.dispatch(request, channels).await?;
    app.health_tracker.record_dispatch();
    Ok(Json(record))
}

// GET /dispatch/history
async fn dispatch_history<P: Publisher>(State(app): State<AppState<P>>) -> Json<Vec<NotificationRecord>> {
    Json(app.dispatcher.history())
}

// GET /contracts
async fn list_contracts<P: Publisher>(State(app): State<AppState<P>>) -> Json<Vec<String>> {
    Json(app.contracts.list_contracts())
}

// GET /contracts/{name}
async fn get_contract<P: Publisher>(
    State(app): State<AppState<P>>,
    Path(name): Path<String>,
) -> Result<Json<Contract>, StatusCode> {
    Ok(Json(app.contracts.get_contract(&name)?.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::topics;
    use crate::state::new_state;
    use axum::body::Body;
    use axum::http::{header, Method};
    use crowdwatch_devkit::{fixtures, MockMqttClient};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const KEY: &str = "test-key";

    struct TestApp {
        router: Router,
        client: MockMqttClient,
        _dir: tempfile::TempDir,
    }

    fn app_with(snapshot: Option<Value>) -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let client = MockMqttClient::new();
        let contacts = Arc::new(ContactBook::open(dir.path().join("contacts.json")).unwrap());
        let snapshots = SnapshotCell::new();
        if let Some(s) = snapshot {
            snapshots.store(serde_json::from_value(s).unwrap());
        }
        let state = AppState {
            settings: new_state(NotificationSettings::default()),
            snapshots,
            venues: Arc::new(VenueCatalog::builtin().unwrap()),
            contacts: contacts.clone(),
            dispatcher: NotificationDispatcher::new(client.clone(), contacts),
            contracts: ContractRegistry::new(),
            health_tracker: HealthTracker::new(),
            api_key: Some(KEY.into()),
        };
        TestApp { router: build_router(state), client, _dir: dir }
    }

    fn app() -> TestApp {
        app_with(Some(fixtures::crowded_snapshot("2025-03-14T19:30:00Z")))
    }

    async fn call(app: &TestApp, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = axum::http::Request::builder().method(method).uri(uri).header("x-api-key", KEY);
        let body = match body {
            Some(b) => {
                req = req.header(header::CONTENT_TYPE, "application/json");
                Body::from(b.to_string())
            }
            None => Body::empty(),
        };
        let response = app.router.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap_or(Value::Null) };
        (status, value)
    }

    #[tokio::test]
    async fn test_api_key_required_except_health() {
        let app = app();
        let open = axum::http::Request::builder().uri("/health").body(Body::empty()).unwrap();
        assert_eq!(app.router.clone().oneshot(open).await.unwrap().status(), StatusCode::OK);

        let locked = axum::http::Request::builder().uri("/insights").body(Body::empty()).unwrap();
        assert_eq!(app.router.clone().oneshot(locked).await.unwrap().status(), StatusCode::UNAUTHORIZED);

        let wrong = axum::http::Request::builder()
            .uri("/insights")
            .header("x-api-key", "nope")
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.router.clone().oneshot(wrong).await.unwrap().status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_insights_listing_and_filters() {
        let app = app();
        let (status, body) = call(&app, Method::GET, "/insights", None).await;
        assert_eq!(status, StatusCode::OK);
        let total = body["insights"].as_array().unwrap().len() as u64;
        let summary = &body["summary"];
        assert_eq!(
            summary["info"].as_u64().unwrap() + summary["warning"].as_u64().unwrap() + summary["critical"].as_u64().unwrap(),
            total
        );

        let (_, critical) = call(&app, Method::GET, "/insights?severity=critical", None).await;
        assert!(critical["insights"].as_array().unwrap().iter().all(|i| i["severity"] == "critical"));
        assert_eq!(critical["summary"], body["summary"]);

        let (_, traffic) = call(&app, Method::GET, "/insights?type=traffic", None).await;
        assert!(traffic["insights"].as_array().unwrap().iter().any(|i| i["title"] == "Multiple High-Traffic Zones Detected"));

        let (status, _) = call(&app, Method::GET, "/insights?severity=severe", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_no_snapshot_means_no_insights() {
        let app = app_with(None);
        let (_, body) = call(&app, Method::GET, "/insights", None).await;
        assert_eq!(body["insights"], json!([]));
        let (status, _) = call(&app, Method::GET, "/zones/stats", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, body) = call(&app, Method::GET, "/venues/bukit-jalil/aggregate", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::Null);
    }

    #[tokio::test]
    async fn test_zone_stats_carry_utilization() {
        let app = app();
        let (status, body) = call(&app, Method::GET, "/zones/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["venueId"], "bukit-jalil");
        let gate = &body["zones"][0];
        assert_eq!(gate["zoneId"], "gate-a");
        assert!(gate["utilizationRate"].as_f64().unwrap() > 80.0);
    }

    #[tokio::test]
    async fn test_settings_update_changes_insights() {
        let app = app();
        let (status, _) = call(
            &app,
            Method::PUT,
            "/settings",
            Some(json!({
                "enabled": true,
                "channels": {"whatsapp": true, "email": false, "sms": false},
                "thresholds": {"occupancyRate": -1, "trafficFlow": 25, "dwellTime": 10},
                "zoneSpecific": {}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(&app, Method::PUT, "/settings/zones/gate-a", Some(json!({"enabled": false}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["zoneSpecific"]["gate-a"]["enabled"], false);

        let (_, insights) = call(&app, Method::GET, "/insights", None).await;
        assert!(insights["insights"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|i| !i["id"].as_str().unwrap().starts_with("multi-zone"))
            .all(|i| i["affectedZones"] != json!(["Gate A"])));

        let (_, body) = call(&app, Method::PUT, "/settings/channels", Some(json!({"whatsapp": false, "email": false, "sms": true}))).await;
        assert_eq!(body["channels"]["sms"], true);
        let (_, body) = call(&app, Method::GET, "/settings", None).await;
        assert_eq!(body["channels"]["whatsapp"], false);
    }

    #[tokio::test]
    async fn test_venue_routes() {
        let app = app();
        let (_, venues) = call(&app, Method::GET, "/venues", None).await;
        assert_eq!(venues.as_array().unwrap().len(), 4);

        let (status, _) = call(&app, Method::GET, "/venues/genting", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, templates) = call(&app, Method::GET, "/venues/klia/zones/pre-screening/insights", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(templates[0]["type"], "bottleneck");

        let (status, _) = call(&app, Method::GET, "/venues/klia/zones/duty-free/insights", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, aggregate) = call(&app, Method::GET, "/venues/bukit-jalil/aggregate", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(aggregate["venueName"], "Bukit Jalil National Stadium");
        assert!(aggregate["affectedZones"].as_array().unwrap().len() >= 3);
    }

    #[tokio::test]
    async fn test_contacts_and_crew() {
        let app = app();
        let (status, created) = call(
            &app,
            Method::POST,
            "/contacts",
            Some(json!({"name": "Aisyah", "phone": "+60122222222", "role": "Security Lead", "group": "security", "isPrimary": true})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_str().unwrap().to_string();

        let (status, _) = call(&app, Method::POST, "/contacts", Some(json!({"name": "", "phone": "1", "role": "x", "group": "medical"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, crew) = call(&app, Method::GET, "/venues/bukit-jalil/zones/gate-a/crew", None).await;
        assert_eq!(crew[0]["id"], id.as_str());
        let (_, crew) = call(&app, Method::GET, "/venues/bukit-jalil/zones/seating/crew", None).await;
        assert_eq!(crew, json!([]));

        let (_, updated) = call(&app, Method::PUT, &format!("/contacts/{id}"), Some(json!({"role": "Chief"}))).await;
        assert_eq!(updated["role"], "Chief");

        let (status, _) = call(&app, Method::DELETE, &format!("/contacts/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&app, Method::GET, &format!("/contacts/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_dispatch_insight_with_default_message() {
        let app = app();
        let (_, listed) = call(&app, Method::GET, "/insights?severity=critical", None).await;
        let insight = listed["insights"][0].clone();
        let insight_id = insight["id"].as_str().unwrap();

        let (status, record) = call(
            &app,
            Method::POST,
            "/dispatch",
            Some(json!({"recipients": ["+60123456789"], "message": "", "insightId": insight_id})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            record["message"],
            format!("{}\n\nRecommended Action: {}", insight["message"].as_str().unwrap(), insight["suggestedAction"].as_str().unwrap())
        );
        assert_eq!(app.client.find_messages_by_topic(topics::DISPATCH).len(), 1);

        let (_, listed) = call(&app, Method::GET, "/insights", None).await;
        assert_eq!(listed["notified"], json!([insight_id]));

        let (_, history) = call(&app, Method::GET, "/dispatch/history", None).await;
        assert_eq!(history.as_array().unwrap().len(), 1);
        let (_, health) = call(&app, Method::GET, "/system/health", None).await;
        assert_eq!(health["dispatchesSent"], 1);
    }

    #[tokio::test]
    async fn test_dispatch_errors() {
        let app = app();
        let (status, _) = call(&app, Method::POST, "/dispatch", Some(json!({"recipients": [], "message": "hi"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        app.client.set_offline(true);
        let (status, _) = call(&app, Method::POST, "/dispatch", Some(json!({"recipients": ["+601"], "message": "hi"}))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        let (_, history) = call(&app, Method::GET, "/dispatch/history", None).await;
        assert_eq!(history[0]["status"], "failed");
    }

    #[tokio::test]
    async fn test_contract_routes() {
        let app = app();
        let (_, list) = call(&app, Method::GET, "/contracts", None).await;
        assert_eq!(list, json!([]));
        let (status, _) = call(&app, Method::GET, "/contracts/stats@v1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
