/**
 * API HTTP - Surface réseau du service
 *
 * ROUTES :
 * - /health          : sonde de vie, toujours `{"status":"ok"}`
 * - /system/health   : état des connexions, sessions et compteurs d'ingestion
 * - /ws              : sessions du générateur de test (voir ws.rs)
 * - /stations        : proxy vers `<GAIA_SERVER_URL>/telemetry/stations` (si configuré)
 * - /test            : fichiers statiques de la page de contrôle
 */

use crate::health::{BridgeHealth, HealthTracker};
use crate::simulation::SimulationScheduler;
use crate::ws;
use axum::extract::{RawQuery, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::path::Path;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

#[derive(Clone)]
pub struct AppState {
    pub scheduler: SimulationScheduler,
    pub health: HealthTracker,
    pub stations: Option<StationsProxy>,
}

pub fn build_router(app_state: AppState, static_dir: &Path) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/system/health", get(system_health))
        .route("/ws", get(ws::ws_handler));

    if app_state.stations.is_some() {
        router = router.route("/stations", get(stations));
    }

    if static_dir.is_dir() {
        router = router.nest_service("/test", ServeDir::new(static_dir));
    } else {
        warn!(dir = %static_dir.display(), "test generator page directory not found, /test disabled");
    }

    router.layer(TraceLayer::new_for_http()).with_state(app_state)
}

// GET /health
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// GET /system/health
async fn system_health(State(app): State<AppState>) -> Json<BridgeHealth> {
    Json(app.health.get_health())
}

// GET /stations?... (relai vers le serveur de stations)
async fn stations(State(app): State<AppState>, RawQuery(query): RawQuery) -> Response {
    match &app.stations {
        Some(proxy) => proxy.fetch(query.as_deref()).await,
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Relai HTTP vers la liste des stations du serveur amont
#[derive(Clone)]
pub struct StationsProxy {
    client: reqwest::Client,
    base_url: String,
}

impl StationsProxy {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn upstream_url(&self, query: Option<&str>) -> String {
        match query {
            Some(q) if !q.is_empty() => format!("{}/telemetry/stations?{q}", self.base_url),
            _ => format!("{}/telemetry/stations", self.base_url),
        }
    }

    async fn fetch(&self, query: Option<&str>) -> Response {
        let url = self.upstream_url(query);
        let upstream = async {
            let response = self.client.get(&url).send().await?;
            let status = response.status().as_u16();
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("application/json")
                .to_string();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, content_type, body))
        };

        match upstream.await {
            Ok((status, content_type, body)) => {
                let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
                (status, [(header::CONTENT_TYPE, content_type)], body).into_response()
            }
            Err(e) => {
                error!(%url, error = %e, "failed to fetch stations list");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "message": "Failed to fetch stations." })),
                )
                    .into_response()
            }
        }
    }
}
