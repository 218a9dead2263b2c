//! # HTTP Server
//!
//! Exposes the harvester as `GET /?url=<repository_url>[&fairsharing_id=<doi>]`
//! and a `GET /health` liveness check.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::export::{ExportDocument, Exporter};
use crate::harvest::pipeline::HarvestOrchestrator;
use crate::store::GraphStore;
use crate::traits::HarvestTarget;

/// Shared resources of the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<HarvestOrchestrator>,
    pub exporter: Exporter,
    pub store: Option<Arc<GraphStore>>,
}

#[derive(Debug, Deserialize)]
pub struct HarvestQuery {
    pub url: Option<String>,
    pub fairsharing_id: Option<String>,
}

/// Error body returned for rejected requests.
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    status: StatusCode,
    error: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(harvest))
        .route("/health", get(health))
        .with_state(state)
}

/// Binds `addr` and serves until the process ends.
pub async fn run_server(addr: SocketAddr, state: AppState) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Harvester listening");
    axum::serve(listener, create_app(state)).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn harvest(
    State(state): State<AppState>,
    Query(query): Query<HarvestQuery>,
) -> Result<Json<ExportDocument>, ApiError> {
    let url = query
        .url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing required query parameter 'url'"))?;

    match Url::parse(&url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
        _ => {
            return Err(ApiError::bad_request(format!(
                "'{}' is not an http(s) URL",
                url
            )))
        }
    }

    let target = HarvestTarget::new(url).with_fairsharing_id(query.fairsharing_id);
    let result = state.orchestrator.harvest_with_hints(target).await;
    let document = state.exporter.export(&result.record);

    if let Some(store) = &state.store {
        store.spawn_persist(result);
    }
    Ok(Json(document))
}
