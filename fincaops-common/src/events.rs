//! Event types and EventBus for the FincaOps event system
//!
//! Events are broadcast via [`EventBus`] and can be serialized for SSE
//! transmission to the operator console. All services use this central enum
//! for type safety and exhaustive matching.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Which of the two stores an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreSource {
    /// Canonical system of record (registry database)
    Registry,
    /// Agent-owned ingestion store
    AgentStore,
}

impl std::fmt::Display for StoreSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreSource::Registry => write!(f, "registry"),
            StoreSource::AgentStore => write!(f, "agent-store"),
        }
    }
}

/// FincaOps bridge event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BridgeEvent {
    /// A store's content changed and a re-fetch was triggered
    ///
    /// Triggers:
    /// - Live view: full re-fetch of the changed source
    StoreChanged {
        source: StoreSource,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The merged live view was republished after a source refresh
    ///
    /// Triggers:
    /// - SSE: console re-renders the ticket list
    TicketsRefreshed {
        source: StoreSource,
        /// Enriched ingestion tickets currently visible
        pending_tickets: usize,
        /// Registry incidents currently visible
        incidents: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A source connection dropped or a fetch failed; last good data is
    /// still being served while retries run with backoff
    SourceDegraded {
        source: StoreSource,
        error: String,
        retry_in_ms: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A previously degraded source recovered
    SourceRecovered {
        source: StoreSource,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The canonical directory cache refreshed (periodic or on demand)
    DirectoryRefreshed {
        communities: usize,
        operators: usize,
        /// True when the refresh timed out and a stale snapshot is served
        degraded: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An ingestion ticket was promoted into the registry
    ///
    /// Triggers:
    /// - SSE: drop the ticket from the ingestion side of the console
    TicketPromoted {
        ingestion_id: String,
        incident_id: uuid::Uuid,
        actor: String,
        /// Non-fatal issues from attachment migration or source marking
        warnings: Vec<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An ingestion ticket was resolved/unresolved in place by an operator
    TicketResolved {
        ingestion_id: String,
        resolved: bool,
        actor: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The attachment list of an ingestion ticket was edited by an operator
    TicketAttachmentsUpdated {
        ingestion_id: String,
        attachment_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl BridgeEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            BridgeEvent::StoreChanged { .. } => "StoreChanged",
            BridgeEvent::TicketsRefreshed { .. } => "TicketsRefreshed",
            BridgeEvent::SourceDegraded { .. } => "SourceDegraded",
            BridgeEvent::SourceRecovered { .. } => "SourceRecovered",
            BridgeEvent::DirectoryRefreshed { .. } => "DirectoryRefreshed",
            BridgeEvent::TicketPromoted { .. } => "TicketPromoted",
            BridgeEvent::TicketResolved { .. } => "TicketResolved",
            BridgeEvent::TicketAttachmentsUpdated { .. } => "TicketAttachmentsUpdated",
        }
    }
}

/// Central event distribution bus for application-wide events
///
/// Uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
/// - Lagged message detection for slow subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BridgeEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: BridgeEvent,
    ) -> Result<usize, broadcast::error::SendError<BridgeEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// Useful for non-critical events where it's acceptable if no component
    /// is currently listening (e.g. periodic refresh notifications).
    pub fn emit_lossy(&self, event: BridgeEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
