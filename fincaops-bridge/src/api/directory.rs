//! Canonical directory endpoints

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::error::ApiResult;
use crate::AppState;

/// GET /api/directory
///
/// The cached snapshot, possibly stale; the degraded flag tells the console
/// whether a refresh has failed since the data was loaded.
pub async fn get_directory(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.directory.snapshot().await;
    Json(json!(&*snapshot))
}

/// POST /api/directory/refresh
///
/// Force a refresh and return the outcome. A failed refresh is an error
/// here (the caller asked for fresh data); background consumers keep using
/// the stale snapshot regardless.
pub async fn refresh_directory(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let snapshot = state.directory.refresh().await?;
    Ok(Json(json!(&*snapshot)))
}
