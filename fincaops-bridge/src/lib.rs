//! fincaops-bridge library - cross-store incident reconciliation
//!
//! Bridges the agent-owned ingestion store and the registry (system of
//! record) behind one HTTP API for the operator console: a merged live
//! ticket view, canonical directory lookups, pre-promotion ticket actions,
//! and the promotion protocol itself.

use std::sync::Arc;

use axum::Router;
use fincaops_common::events::EventBus;
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod attachments;
pub mod config;
pub mod db;
pub mod directory;
pub mod error;
pub mod live_view;
pub mod normalizer;
pub mod resolver;
pub mod transfer;

use directory::DirectoryCache;
use live_view::DualSourceLiveView;
use transfer::TransferCoordinator;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: SqlitePool,
    pub agent: SqlitePool,
    pub agent_table: String,
    pub event_bus: EventBus,
    pub directory: Arc<DirectoryCache>,
    pub live_view: Arc<DualSourceLiveView>,
    pub transfer: Arc<TransferCoordinator>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, post};

    Router::new()
        .route("/health", get(api::health::health_check))
        .route("/api/tickets", get(api::tickets::list_tickets))
        .route("/api/tickets/:id/resolution", post(api::tickets::set_resolution))
        .route("/api/tickets/:id/attachments", post(api::tickets::update_attachments))
        .route("/api/tickets/:id/promote", post(api::promote::promote_ticket))
        .route("/api/incidents", get(api::tickets::list_incidents))
        .route("/api/directory", get(api::directory::get_directory))
        .route("/api/directory/refresh", post(api::directory::refresh_directory))
        .route("/events", get(api::sse::event_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
