//! HTTP API tests against the real router
//!
//! Requests go through `tower::ServiceExt::oneshot` on the assembled router
//! with temp-dir SQLite stores behind it.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use fincaops_common::events::EventBus;
use tempfile::TempDir;
use tower::ServiceExt;

use fincaops_bridge::attachments::AttachmentMigrator;
use fincaops_bridge::db;
use fincaops_bridge::directory::DirectoryCache;
use fincaops_bridge::live_view::DualSourceLiveView;
use fincaops_bridge::transfer::TransferCoordinator;
use fincaops_bridge::{build_router, AppState};

async fn app(dir: &TempDir) -> axum::Router {
    let registry = db::init_registry_pool(&dir.path().join("registry.db"))
        .await
        .unwrap();
    sqlx::query("INSERT INTO communities (id, display_code, name) VALUES (5, 'SOL', 'Residencial El Sol')")
        .execute(&registry)
        .await
        .unwrap();
    sqlx::query("INSERT INTO operators (id, display_name, is_active) VALUES ('u-42', 'Marta', 1)")
        .execute(&registry)
        .await
        .unwrap();

    let agent = sqlx::sqlite::SqlitePoolOptions::new()
        .connect(&format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("agent.db").display()
        ))
        .await
        .unwrap();
    sqlx::query(
        "CREATE TABLE tickets (
            id TEXT PRIMARY KEY,
            Comunidad TEXT,
            mensaje TEXT,
            resuelto INTEGER DEFAULT 0
        )",
    )
    .execute(&agent)
    .await
    .unwrap();
    sqlx::query("INSERT INTO tickets (id, Comunidad, mensaje) VALUES ('tk-001', 'SOL', 'Fuga en el garaje')")
        .execute(&agent)
        .await
        .unwrap();

    let event_bus = EventBus::new(64);
    let directory = Arc::new(DirectoryCache::new(
        registry.clone(),
        event_bus.clone(),
        Duration::from_secs(5),
    ));
    directory.refresh().await.unwrap();

    let live_view = Arc::new(DualSourceLiveView::new(
        registry.clone(),
        agent.clone(),
        "tickets".to_string(),
        directory.clone(),
        event_bus.clone(),
        Duration::from_millis(50),
    ));
    live_view.refresh_registry().await.unwrap();
    live_view.refresh_agent().await.unwrap();

    let migrator = AttachmentMigrator::new(
        dir.path().to_path_buf(),
        dir.path().join("registry-attachments"),
    );
    let transfer = Arc::new(TransferCoordinator::new(
        registry.clone(),
        agent.clone(),
        "tickets".to_string(),
        directory.clone(),
        migrator,
        event_bus.clone(),
    ));

    build_router(AppState {
        registry,
        agent,
        agent_table: "tickets".to_string(),
        event_bus,
        directory,
        live_view,
        transfer,
        started_at: chrono::Utc::now(),
    })
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_module_and_store_state() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "fincaops-bridge");
    assert_eq!(json["registry"]["healthy"], true);
    assert_eq!(json["directory_degraded"], false);
}

#[tokio::test]
async fn tickets_listing_returns_enriched_view() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    let response = app
        .oneshot(Request::get("/api/tickets").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let tickets = json["tickets"].as_array().unwrap();
    assert_eq!(tickets.len(), 1);
    assert_eq!(tickets[0]["id"], "tk-001");
    assert_eq!(tickets[0]["resolved_community_id"], 5);
}

#[tokio::test]
async fn directory_endpoint_serves_cached_snapshot() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    let response = app
        .oneshot(Request::get("/api/directory").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["communities"][0]["display_code"], "SOL");
    assert_eq!(json["operators"][0]["id"], "u-42");
}

#[tokio::test]
async fn promote_endpoint_round_trip() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    let request = Request::post("/api/tickets/tk-001/promote")
        .header("content-type", "application/json")
        .body(Body::from(
            r#"{"community_id": 5, "operator_id": "u-42", "actor": "admin"}"#,
        ))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["outcome"], "created");
    assert_eq!(json["incident"]["community_id"], 5);

    // Repeat promotion is still a 200, reporting the existing incident
    let request = Request::post("/api/tickets/tk-001/promote")
        .header("content-type", "application/json")
        .body(Body::from(
            r#"{"community_id": 5, "operator_id": "u-42", "actor": "admin"}"#,
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["outcome"], "already_transferred");
}

#[tokio::test]
async fn promote_with_unknown_identity_is_422() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    let request = Request::post("/api/tickets/tk-001/promote")
        .header("content-type", "application/json")
        .body(Body::from(
            r#"{"community_id": 777, "operator_id": "nadie", "actor": "admin"}"#,
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "UNRESOLVED_IDENTITY");
}

#[tokio::test]
async fn attachment_edit_without_column_is_conflict() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    // The fixture's agent schema has no attachments column
    let request = Request::post("/api/tickets/tk-001/attachments")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"attachments": ["nueva.jpg"]}"#))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn resolution_endpoint_updates_agent_store() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    let request = Request::post("/api/tickets/tk-001/resolution")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"resolved": true, "actor": "admin"}"#))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::post("/api/tickets/tk-missing/resolution")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"resolved": true, "actor": "admin"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
