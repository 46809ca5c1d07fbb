//! Health check endpoint

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use fincaops_common::events::StoreSource;
use serde::Serialize;

use crate::live_view::SourceStatus;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_secs: i64,
    pub registry: SourceStatus,
    pub agent_store: SourceStatus,
    pub directory_refreshed_at: Option<DateTime<Utc>>,
    pub directory_degraded: bool,
}

/// GET /health
///
/// "ok" as long as the process serves; per-store health is reported in the
/// body so the console can flag a degraded side without losing the whole UI.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.live_view.status(StoreSource::Registry).await;
    let agent_store = state.live_view.status(StoreSource::AgentStore).await;
    let directory = state.directory.snapshot().await;

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "fincaops-bridge".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        registry,
        agent_store,
        directory_refreshed_at: directory.refreshed_at,
        directory_degraded: directory.degraded,
    })
}
