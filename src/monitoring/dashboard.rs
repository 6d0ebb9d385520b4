//! Dashboard API: axum HTTP server serving the latest valuation as JSON.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::db::store::Store;
use crate::monitoring::health::HealthState;
use crate::tracker::LatestReport;
use crate::valuation::engine::{Access, ValuationEngine, ValuationReport};
use crate::valuation::metrics::BoundaryMarker;

/// Shared state accessible by all dashboard route handlers.
#[derive(Clone)]
pub struct DashboardState {
    store: Store,
    health: HealthState,
    engine: Arc<ValuationEngine>,
    latest: LatestReport,
}

impl DashboardState {
    pub fn new(
        store: Store,
        health: HealthState,
        engine: Arc<ValuationEngine>,
        latest: LatestReport,
    ) -> Self {
        Self {
            store,
            health,
            engine,
            latest,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AccessQuery {
    #[serde(default)]
    access: Access,
}

pub fn router(state: DashboardState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/valuation", get(valuation_handler))
        .route("/api/tiers", get(tiers_handler))
        .route("/api/levels", get(levels_handler))
        .route("/api/alerts", get(alerts_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Spawn the dashboard HTTP server. Returns a handle that can be aborted.
pub fn spawn_dashboard(state: DashboardState, bind: &str, port: u16) -> JoinHandle<()> {
    let addr = format!("{bind}:{port}");

    tokio::spawn(async move {
        let app = router(state);

        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(l) => {
                info!(addr = %addr, "Dashboard server listening");
                l
            }
            Err(e) => {
                warn!(error = %e, addr = %addr, "Failed to bind dashboard server");
                return;
            }
        };

        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = %e, "Dashboard server error");
        }
    })
}

// -- Route Handlers --

async fn health_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(state.health.to_json().await)
}

async fn latest(state: &DashboardState) -> Option<ValuationReport> {
    state.latest.read().await.clone()
}

/// Latest report. Analytics are hidden unless `?access=pro`.
async fn valuation_handler(
    State(state): State<DashboardState>,
    Query(query): Query<AccessQuery>,
) -> impl IntoResponse {
    match latest(&state).await {
        Some(report) => (StatusCode::OK, Json(serde_json::json!(report.redacted_for(query.access)))),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": "no valuation yet"})),
        ),
    }
}

async fn tiers_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "reference_multiple": state.engine.reference_multiple(),
        "tiers": state.engine.table(),
        "gauge": state.engine.gauge(),
        "segments": state.engine.gauge_segments(),
    }))
}

/// Tier boundary prices for the chart. Empty for free callers and before the first report.
async fn levels_handler(
    State(state): State<DashboardState>,
    Query(query): Query<AccessQuery>,
) -> impl IntoResponse {
    let markers: Vec<BoundaryMarker> = latest(&state)
        .await
        .map(|report| report.redacted_for(query.access))
        .and_then(|report| report.details().map(|details| details.markers.clone()))
        .unwrap_or_default();
    Json(serde_json::json!(markers))
}

async fn alerts_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    match state.store.recent_alerts(50).await {
        Ok(alerts) => Json(serde_json::to_value(&alerts).unwrap_or_default()),
        Err(e) => Json(serde_json::json!({"error": e.to_string()})),
    }
}
