//! Ticket listing and pre-promotion actions
//!
//! Reads serve from the merged live view; writes go straight at the agent
//! store and nudge the watchers through StoreChanged so the view catches up
//! without waiting for the next poll.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use fincaops_common::events::{BridgeEvent, StoreSource};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::agent;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// The ticket exists but its schema has no column for this write; that is a
/// 409 on the operation, not a missing resource
fn schema_conflict(err: fincaops_common::Error) -> ApiError {
    match err {
        fincaops_common::Error::NotFound(msg) => ApiError::Conflict(msg),
        other => other.into(),
    }
}

/// GET /api/tickets
///
/// Enriched, not-yet-promoted agent tickets from the live view.
pub async fn list_tickets(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.live_view.snapshot().await;
    Json(json!({ "tickets": snapshot.pending_tickets }))
}

/// GET /api/incidents
pub async fn list_incidents(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.live_view.snapshot().await;
    Json(json!({ "incidents": snapshot.incidents }))
}

#[derive(Debug, Deserialize)]
pub struct SetResolutionRequest {
    pub resolved: bool,
    pub actor: String,
}

/// POST /api/tickets/:id/resolution
///
/// Resolve or reopen a ticket in place, without promoting it.
pub async fn set_resolution(
    State(state): State<AppState>,
    Path(ingestion_id): Path<String>,
    Json(request): Json<SetResolutionRequest>,
) -> ApiResult<Json<Value>> {
    let raw = agent::fetch_ticket(&state.agent, &state.agent_table, &ingestion_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("ticket {}", ingestion_id)))?;

    agent::set_resolution(
        &state.agent,
        &state.agent_table,
        &raw,
        request.resolved,
        &request.actor,
    )
    .await
    .map_err(schema_conflict)?;

    state.event_bus.emit_lossy(BridgeEvent::TicketResolved {
        ingestion_id: ingestion_id.clone(),
        resolved: request.resolved,
        actor: request.actor,
        timestamp: Utc::now(),
    });
    state.event_bus.emit_lossy(BridgeEvent::StoreChanged {
        source: StoreSource::AgentStore,
        timestamp: Utc::now(),
    });

    Ok(Json(json!({ "id": ingestion_id, "resolved": request.resolved })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateAttachmentsRequest {
    pub attachments: Vec<String>,
}

/// POST /api/tickets/:id/attachments
///
/// Replace a ticket's attachment refs before promotion.
pub async fn update_attachments(
    State(state): State<AppState>,
    Path(ingestion_id): Path<String>,
    Json(request): Json<UpdateAttachmentsRequest>,
) -> ApiResult<Json<Value>> {
    let raw = agent::fetch_ticket(&state.agent, &state.agent_table, &ingestion_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("ticket {}", ingestion_id)))?;

    agent::update_attachments(&state.agent, &state.agent_table, &raw, &request.attachments)
        .await
        .map_err(schema_conflict)?;

    state
        .event_bus
        .emit_lossy(BridgeEvent::TicketAttachmentsUpdated {
            ingestion_id: ingestion_id.clone(),
            attachment_count: request.attachments.len(),
            timestamp: Utc::now(),
        });
    state.event_bus.emit_lossy(BridgeEvent::StoreChanged {
        source: StoreSource::AgentStore,
        timestamp: Utc::now(),
    });

    Ok(Json(json!({
        "id": ingestion_id,
        "attachment_count": request.attachments.len(),
    })))
}
