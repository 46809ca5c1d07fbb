//! Merged live view over the registry and the agent ingestion store
//!
//! One watcher task per store polls SQLite's `data_version` counter and
//! re-fetches when it moves. Each watcher only ever replaces its own half of
//! the merged state; a failing store degrades with backoff and its last good
//! data keeps being served until it recovers. Agent tickets whose ingestion
//! id already appears in the transfer ledger are filtered out at the merge
//! point, so a promoted ticket disappears from the pending list even when
//! the agent-side resolution marking could not be applied.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fincaops_common::events::{BridgeEvent, EventBus, StoreSource};
use fincaops_common::Result;
use sqlx::SqlitePool;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db::registry::{self, Incident};
use crate::db::agent;
use crate::directory::DirectoryCache;
use crate::normalizer;
use crate::resolver::{self, EnrichedTicket};

/// Backoff bounds for a degraded store
const RETRY_INITIAL: Duration = Duration::from_secs(2);
const RETRY_MAX: Duration = Duration::from_secs(30);

/// Health and freshness of one side of the view
#[derive(Debug, Clone, serde::Serialize)]
pub struct SourceStatus {
    pub healthy: bool,
    pub last_refresh: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SourceStatus {
    fn initial() -> Self {
        Self {
            healthy: true,
            last_refresh: None,
            last_error: None,
        }
    }
}

/// Point-in-time copy of the merged view
#[derive(Debug, Clone, Default)]
pub struct LiveSnapshot {
    /// Agent tickets not yet promoted, enriched with resolved canonical ids
    pub pending_tickets: Vec<EnrichedTicket>,
    /// Incidents in the system of record
    pub incidents: Vec<Incident>,
}

#[derive(Debug)]
struct ViewState {
    pending_tickets: Vec<EnrichedTicket>,
    incidents: Vec<Incident>,
    /// Ingestion ids recorded in the transfer ledger, used to filter the
    /// agent side of the merge
    promoted: HashSet<String>,
    registry_status: SourceStatus,
    agent_status: SourceStatus,
}

/// Merged view of both stores with independent per-source watchers
///
/// The only mutable state lives behind the internal lock; watcher tasks and
/// API handlers share one instance through an `Arc`.
pub struct DualSourceLiveView {
    registry: SqlitePool,
    agent: SqlitePool,
    agent_table: String,
    directory: Arc<DirectoryCache>,
    event_bus: EventBus,
    poll_interval: Duration,
    state: RwLock<ViewState>,
}

impl DualSourceLiveView {
    pub fn new(
        registry: SqlitePool,
        agent: SqlitePool,
        agent_table: String,
        directory: Arc<DirectoryCache>,
        event_bus: EventBus,
        poll_interval: Duration,
    ) -> Self {
        Self {
            registry,
            agent,
            agent_table,
            directory,
            event_bus,
            poll_interval,
            state: RwLock::new(ViewState {
                pending_tickets: Vec::new(),
                incidents: Vec::new(),
                promoted: HashSet::new(),
                registry_status: SourceStatus::initial(),
                agent_status: SourceStatus::initial(),
            }),
        }
    }

    /// Current merged view; never blocks on either store
    pub async fn snapshot(&self) -> LiveSnapshot {
        let state = self.state.read().await;
        LiveSnapshot {
            pending_tickets: state.pending_tickets.clone(),
            incidents: state.incidents.clone(),
        }
    }

    pub async fn status(&self, source: StoreSource) -> SourceStatus {
        let state = self.state.read().await;
        match source {
            StoreSource::Registry => state.registry_status.clone(),
            StoreSource::AgentStore => state.agent_status.clone(),
        }
    }

    /// Re-read the registry side: incidents plus the promoted-id filter set
    pub async fn refresh_registry(&self) -> Result<()> {
        let incidents = registry::list_incidents(&self.registry).await?;
        let promoted: HashSet<String> = registry::promoted_source_ids(&self.registry)
            .await?
            .into_iter()
            .collect();

        let counts = {
            let mut state = self.state.write().await;
            state.incidents = incidents;
            // Ids can only be added to the ledger, so the filter set may
            // grow but the old one stays valid while the registry is down
            state
                .pending_tickets
                .retain(|t| !promoted.contains(&t.ticket.id));
            state.promoted = promoted;
            state.registry_status.last_refresh = Some(Utc::now());
            state.registry_status.last_error = None;
            (state.pending_tickets.len(), state.incidents.len())
        };

        debug!(incidents = counts.1, "Registry view refreshed");
        self.event_bus.emit_lossy(BridgeEvent::TicketsRefreshed {
            source: StoreSource::Registry,
            pending_tickets: counts.0,
            incidents: counts.1,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Re-read the agent side: fetch, normalize, enrich against the current
    /// directory snapshot, then drop everything already promoted
    pub async fn refresh_agent(&self) -> Result<()> {
        let raw = agent::fetch_all_tickets(&self.agent, &self.agent_table).await?;
        let directory = self.directory.snapshot().await;

        let enriched: Vec<EnrichedTicket> = raw
            .iter()
            .map(|r| resolver::enrich(normalizer::normalize(r), &directory))
            .collect();

        let counts = {
            let mut state = self.state.write().await;
            state.pending_tickets = enriched
                .into_iter()
                .filter(|t| !state.promoted.contains(&t.ticket.id))
                .collect();
            state.agent_status.last_refresh = Some(Utc::now());
            state.agent_status.last_error = None;
            (state.pending_tickets.len(), state.incidents.len())
        };

        debug!(pending = counts.0, "Agent view refreshed");
        self.event_bus.emit_lossy(BridgeEvent::TicketsRefreshed {
            source: StoreSource::AgentStore,
            pending_tickets: counts.0,
            incidents: counts.1,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn refresh(&self, source: StoreSource) -> Result<()> {
        match source {
            StoreSource::Registry => self.refresh_registry().await,
            StoreSource::AgentStore => self.refresh_agent().await,
        }
    }

    fn pool_for(&self, source: StoreSource) -> &SqlitePool {
        match source {
            StoreSource::Registry => &self.registry,
            StoreSource::AgentStore => &self.agent,
        }
    }

    async fn mark_degraded(&self, source: StoreSource, message: String, retry_in: Duration) {
        {
            let mut state = self.state.write().await;
            let status = match source {
                StoreSource::Registry => &mut state.registry_status,
                StoreSource::AgentStore => &mut state.agent_status,
            };
            status.healthy = false;
            status.last_error = Some(message.clone());
        }
        self.event_bus.emit_lossy(BridgeEvent::SourceDegraded {
            source,
            error: message,
            retry_in_ms: retry_in.as_millis() as u64,
            timestamp: Utc::now(),
        });
    }

    async fn mark_recovered(&self, source: StoreSource) {
        {
            let mut state = self.state.write().await;
            let status = match source {
                StoreSource::Registry => &mut state.registry_status,
                StoreSource::AgentStore => &mut state.agent_status,
            };
            status.healthy = true;
            status.last_error = None;
        }
        info!(source = %source, "Store recovered");
        self.event_bus.emit_lossy(BridgeEvent::SourceRecovered {
            source,
            timestamp: Utc::now(),
        });
    }

    /// Spawn both watcher tasks; they run until the token is cancelled
    pub fn spawn_watchers(self: &Arc<Self>, cancel: CancellationToken) {
        for source in [StoreSource::Registry, StoreSource::AgentStore] {
            let view = Arc::clone(self);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                view.watch(source, cancel).await;
            });
        }
    }

    /// One source's watch loop
    ///
    /// Polls `data_version` on the poll interval and re-fetches when it
    /// moves. In-process writes are picked up sooner through StoreChanged
    /// events on the bus. Failures degrade the source with doubling backoff;
    /// the merged view keeps serving the last good data throughout.
    async fn watch(self: Arc<Self>, source: StoreSource, cancel: CancellationToken) {
        let mut bus_rx = self.event_bus.subscribe();
        let mut last_version: Option<i64> = None;
        let mut degraded = false;
        let mut retry = RETRY_INITIAL;

        // First fetch populates the view before the server answers requests
        if let Err(e) = self.refresh(source).await {
            warn!(source = %source, error = %e, "Initial refresh failed");
            self.mark_degraded(source, e.to_string(), retry).await;
            degraded = true;
        }

        loop {
            let sleep_for = if degraded { retry } else { self.poll_interval };
            let mut triggered = false;

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(source = %source, "Watcher stopping");
                    return;
                }
                _ = tokio::time::sleep(sleep_for) => {}
                event = bus_rx.recv() => {
                    match event {
                        Ok(BridgeEvent::StoreChanged { source: changed, .. })
                            if changed == source =>
                        {
                            triggered = true;
                        }
                        Ok(_) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            // Missed notifications are safe: the version
                            // poll below catches any change they announced
                            debug!(source = %source, skipped = n, "Watcher lagged on event bus");
                            triggered = true;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => continue,
                    }
                }
            }

            let outcome = async {
                if triggered {
                    // A local writer just committed; skip the version probe
                    last_version = agent::data_version(self.pool_for(source)).await.ok();
                    return self.refresh(source).await.map(|_| true);
                }
                let version = agent::data_version(self.pool_for(source)).await?;
                if last_version == Some(version) {
                    return Ok(false);
                }
                self.refresh(source).await?;
                last_version = Some(version);
                Ok(true)
            }
            .await;

            match outcome {
                Ok(refreshed) => {
                    if degraded {
                        degraded = false;
                        retry = RETRY_INITIAL;
                        self.mark_recovered(source).await;
                        if !refreshed {
                            // Probe succeeded but nothing moved; still
                            // re-fetch once so the view reflects anything
                            // written while the source was down
                            if let Err(e) = self.refresh(source).await {
                                error!(source = %source, error = %e, "Post-recovery refresh failed");
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(source = %source, error = %e, retry_secs = retry.as_secs(), "Store poll failed");
                    self.mark_degraded(source, e.to_string(), retry).await;
                    degraded = true;
                    retry = (retry * 2).min(RETRY_MAX);
                }
            }
        }
    }
}
