//! HTTP read API and on-demand refresh trigger.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use common::{FareDetails, GroupKey, IataCode, MonthToken};
use refresh_engine::{
    CacheEntry, CacheSnapshot, CycleStats, RefreshError, RefreshOrchestrator, RefreshPhase,
};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<RefreshOrchestrator>,
    pub currency: Arc<str>,
}

/// CORS policy for browser clients. An empty list allows any origin.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    if origins.is_empty() {
        return cors.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(allowed))
}

pub fn router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/api/fares", get(get_fares))
        .route("/api/refresh", post(trigger_refresh))
        .route("/api/status", get(get_status))
        .route("/healthz", get(healthz))
        .layer(cors)
        .with_state(state)
}

// ── Response bodies ─────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FaresResponse {
    refreshed_at: Option<DateTime<Utc>>,
    results_by_key: BTreeMap<GroupKey, Vec<FareView>>,
}

#[derive(Debug, Serialize)]
struct RouteView {
    origin: IataCode,
    destination: IataCode,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FareView {
    route: RouteView,
    outbound_month: MonthToken,
    inbound_month: MonthToken,
    price: f64,
    currency: String,
    details: FareDetails,
}

impl FareView {
    fn new(entry: &CacheEntry, currency: &str) -> Self {
        Self {
            route: RouteView {
                origin: entry.query.route.origin.iata.clone(),
                destination: entry.query.route.destination.iata.clone(),
            },
            outbound_month: entry.query.months.outbound(),
            inbound_month: entry.query.months.inbound(),
            price: entry.price(),
            currency: currency.to_string(),
            details: entry.quote.details.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    status: &'static str,
    refreshed_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LastCycle {
    cycle_id: u64,
    refreshed_at: DateTime<Utc>,
    groups: usize,
    entries: usize,
    stats: CycleStats,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    phase: RefreshPhase,
    refreshing: bool,
    published_count: u64,
    last_cycle: Option<LastCycle>,
}

// ── Errors ──────────────────────────────────────────────────────────

pub enum ApiError {
    Refresh(RefreshError),
    Internal(String),
}

impl From<RefreshError> for ApiError {
    fn from(e: RefreshError) -> Self {
        ApiError::Refresh(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Refresh(e @ RefreshError::AlreadyInProgress) => {
                (StatusCode::CONFLICT, e.to_string())
            }
            ApiError::Refresh(e @ RefreshError::Generation(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        (status, Json(json!({ "status": "error", "message": message }))).into_response()
    }
}

// ── Handlers ────────────────────────────────────────────────────────

fn fares_body(snapshot: Option<&CacheSnapshot>, currency: &str) -> FaresResponse {
    let Some(snapshot) = snapshot else {
        return FaresResponse {
            refreshed_at: None,
            results_by_key: BTreeMap::new(),
        };
    };
    FaresResponse {
        refreshed_at: Some(snapshot.refreshed_at),
        results_by_key: snapshot
            .groups
            .iter()
            .map(|(key, entries)| {
                let views = entries.iter().map(|e| FareView::new(e, currency)).collect();
                (key.clone(), views)
            })
            .collect(),
    }
}

async fn get_fares(State(state): State<AppState>) -> Json<FaresResponse> {
    let snapshot = state.orchestrator.store().load();
    Json(fares_body(snapshot.as_deref(), &state.currency))
}

async fn trigger_refresh(State(state): State<AppState>) -> Result<Json<RefreshResponse>, ApiError> {
    info!("On-demand refresh requested");
    // Spawned so a client disconnect does not cancel the cycle.
    let snapshot = state
        .orchestrator
        .spawn_refresh()
        .await
        .map_err(|e| {
            error!("Refresh task failed: {}", e);
            ApiError::Internal(format!("refresh task failed: {e}"))
        })??;

    Ok(Json(RefreshResponse {
        status: "success",
        refreshed_at: snapshot.refreshed_at,
    }))
}

async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let store = state.orchestrator.store();
    let last_cycle = store.load().map(|s| LastCycle {
        cycle_id: s.cycle_id,
        refreshed_at: s.refreshed_at,
        groups: s.groups.len(),
        entries: s.entry_count(),
        stats: s.stats.clone(),
    });
    Json(StatusResponse {
        phase: state.orchestrator.phase(),
        refreshing: state.orchestrator.is_refreshing(),
        published_count: store.published_count(),
        last_cycle,
    })
}

async fn healthz() -> StatusCode {
    StatusCode::NO_CONTENT
}
