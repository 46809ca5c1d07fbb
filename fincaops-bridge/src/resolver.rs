//! Identity resolution of ingestion-record references against the directory
//!
//! Resolution is exact-match only: a reference resolves when it already
//! carries a stable identifier (community id or code, operator id). Fuzzy
//! matching of free-text building labels is deliberately not attempted -
//! misfiling an incident against the wrong community is worse than asking
//! the operator to pick one, so unresolved fields are surfaced to a human
//! instead.
//!
//! These functions are pure and synchronous; they run on the calling task
//! after every live-view refresh and must not do I/O.

use crate::directory::DirectorySnapshot;
use crate::normalizer::NormalizedTicket;
use serde::Serialize;

/// Resolve a building label to a canonical community id
///
/// Accepts the numeric id itself or the community's display code
/// (case-insensitive). Anything else - including an exact name match - is
/// unresolved.
pub fn resolve_community(snapshot: &DirectorySnapshot, label: &str) -> Option<i64> {
    let label = label.trim();
    if label.is_empty() {
        return None;
    }

    if let Ok(id) = label.parse::<i64>() {
        if snapshot.communities.iter().any(|c| c.id == id) {
            return Some(id);
        }
        return None;
    }

    snapshot
        .communities
        .iter()
        .find(|c| !c.display_code.is_empty() && c.display_code.eq_ignore_ascii_case(label))
        .map(|c| c.id)
}

/// Resolve an assignee reference to a canonical operator id
///
/// Exact id match only; inactive operators never resolve.
pub fn resolve_operator(snapshot: &DirectorySnapshot, reference: &str) -> Option<String> {
    let reference = reference.trim();
    if reference.is_empty() {
        return None;
    }

    snapshot
        .operators
        .iter()
        .find(|o| o.is_active && o.id == reference)
        .map(|o| o.id.clone())
}

/// Normalized ticket annotated with its resolution state
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedTicket {
    #[serde(flatten)]
    pub ticket: NormalizedTicket,
    /// Canonical community id, when the building label resolved
    pub resolved_community_id: Option<i64>,
    /// Canonical operator id, when the assignee reference resolved
    pub resolved_operator_id: Option<String>,
}

/// Annotate a normalized ticket against the current directory snapshot
pub fn enrich(ticket: NormalizedTicket, snapshot: &DirectorySnapshot) -> EnrichedTicket {
    let resolved_community_id = resolve_community(snapshot, &ticket.building_label);
    let resolved_operator_id = resolve_operator(snapshot, &ticket.assignee_ref);

    EnrichedTicket {
        ticket,
        resolved_community_id,
        resolved_operator_id,
    }
}
