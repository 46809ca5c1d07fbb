//! Promotion endpoint

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiResult;
use crate::transfer::TransferOutcome;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct PromoteRequest {
    /// Operator-confirmed canonical community id
    pub community_id: i64,
    /// Operator-confirmed canonical operator id
    pub operator_id: String,
    pub actor: String,
}

/// POST /api/tickets/:id/promote
///
/// Both outcomes are 200s: a repeat promotion reports the existing incident
/// instead of failing, so the console can always show where the ticket went.
pub async fn promote_ticket(
    State(state): State<AppState>,
    Path(ingestion_id): Path<String>,
    Json(request): Json<PromoteRequest>,
) -> ApiResult<Json<Value>> {
    let outcome = state
        .transfer
        .promote(
            &ingestion_id,
            request.community_id,
            &request.operator_id,
            &request.actor,
        )
        .await?;

    let body = match outcome {
        TransferOutcome::Created { incident, warnings } => json!({
            "outcome": "created",
            "incident": incident,
            "warnings": warnings,
        }),
        TransferOutcome::AlreadyTransferred { incident } => json!({
            "outcome": "already_transferred",
            "incident": incident,
            "warnings": [],
        }),
    };

    Ok(Json(body))
}
