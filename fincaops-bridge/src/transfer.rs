//! Promotion of agent tickets into registry incidents
//!
//! The coordinator walks the transfer protocol: validate the requested
//! canonical identities against a fresh directory snapshot, re-read the
//! source ticket, write the incident and its ledger row in one registry
//! transaction, then migrate attachments and mark the source. Everything
//! after the registry transaction is non-fatal; problems there surface as
//! warnings on the outcome instead of failing a promotion that already
//! happened.
//!
//! The UNIQUE constraint on the incident's source ingestion id is the only
//! concurrency control. Two racing promotions of the same ticket both reach
//! the insert; exactly one row is created and the loser reports the
//! existing incident as already transferred.

use std::sync::Arc;

use chrono::Utc;
use fincaops_common::events::{BridgeEvent, EventBus, StoreSource};
use fincaops_common::Error;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::attachments::AttachmentMigrator;
use crate::db::agent;
use crate::db::registry::{self, Incident, InsertOutcome, NewIncident};
use crate::directory::DirectoryCache;
use crate::normalizer;
use crate::resolver;

/// Result of a promotion request
#[derive(Debug)]
pub enum TransferOutcome {
    Created {
        incident: Incident,
        /// Non-fatal issues from attachment migration or source marking
        warnings: Vec<String>,
    },
    /// The ledger already holds this ingestion id; promotion is a no-op
    /// and the existing incident is returned
    AlreadyTransferred { incident: Incident },
}

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// The requested community or operator does not resolve to an active
    /// canonical entity; nothing was written
    #[error("unresolved identity: {}", fields.join(", "))]
    UnresolvedIdentity { fields: Vec<String> },

    /// The source ticket disappeared between listing and promotion
    #[error("source ticket {0} no longer exists")]
    SourceVanished(String),

    /// The system of record cannot be reached; promotion is refused rather
    /// than attempted blind
    #[error("registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error(transparent)]
    Other(#[from] Error),
}

fn registry_err(e: Error) -> TransferError {
    match e {
        Error::Database(db) => TransferError::RegistryUnavailable(db.to_string()),
        other => TransferError::Other(other),
    }
}

pub struct TransferCoordinator {
    registry: SqlitePool,
    agent: SqlitePool,
    agent_table: String,
    directory: Arc<DirectoryCache>,
    migrator: AttachmentMigrator,
    event_bus: EventBus,
}

impl TransferCoordinator {
    pub fn new(
        registry: SqlitePool,
        agent: SqlitePool,
        agent_table: String,
        directory: Arc<DirectoryCache>,
        migrator: AttachmentMigrator,
        event_bus: EventBus,
    ) -> Self {
        Self {
            registry,
            agent,
            agent_table,
            directory,
            migrator,
            event_bus,
        }
    }

    /// Promote one agent ticket into a registry incident
    ///
    /// `community_id` and `operator_id` are the operator-confirmed canonical
    /// identities; suggestions from the resolver never reach this path
    /// unreviewed. `actor` is recorded in the ledger.
    pub async fn promote(
        &self,
        ingestion_id: &str,
        community_id: i64,
        operator_id: &str,
        actor: &str,
    ) -> Result<TransferOutcome, TransferError> {
        // Validate against a snapshot no older than this request. Any
        // refresh failure, timeout included, means the system of record
        // cannot be consulted right now.
        let directory = self
            .directory
            .refresh()
            .await
            .map_err(|e| TransferError::RegistryUnavailable(e.to_string()))?;

        let mut unresolved = Vec::new();
        if resolver::resolve_community(&directory, &community_id.to_string()).is_none() {
            unresolved.push(format!("community {}", community_id));
        }
        if resolver::resolve_operator(&directory, operator_id).is_none() {
            unresolved.push(format!("operator {}", operator_id));
        }
        if !unresolved.is_empty() {
            return Err(TransferError::UnresolvedIdentity { fields: unresolved });
        }

        // Ledger pre-check; the insert below still catches races
        if let Some(existing) = registry::find_incident_by_source(&self.registry, ingestion_id)
            .await
            .map_err(registry_err)?
        {
            return Ok(TransferOutcome::AlreadyTransferred { incident: existing });
        }

        // Snapshot data from the listing may be stale; promote what the
        // source holds right now
        let raw = agent::fetch_ticket(&self.agent, &self.agent_table, ingestion_id)
            .await?
            .ok_or_else(|| TransferError::SourceVanished(ingestion_id.to_string()))?;
        let ticket = normalizer::normalize(&raw);

        let new = NewIncident {
            community_id,
            client_name: ticket.client_name.clone(),
            client_phone: ticket.client_phone.clone(),
            client_email: ticket.client_email.clone(),
            message: ticket.message.clone(),
            assignee_id: operator_id.to_string(),
            attachments: ticket.attachments.clone(),
            source_ingestion_id: ticket.id.clone(),
        };

        let incident = match registry::insert_incident(&self.registry, &new, actor)
            .await
            .map_err(registry_err)?
        {
            InsertOutcome::Created(incident) => incident,
            InsertOutcome::DuplicateSource => {
                // Lost a race; the winner's incident is authoritative
                let existing = registry::find_incident_by_source(&self.registry, ingestion_id)
                    .await
                    .map_err(registry_err)?
                    .ok_or_else(|| {
                        Error::Internal(format!(
                            "ledger holds {} but no incident found",
                            ingestion_id
                        ))
                    })?;
                return Ok(TransferOutcome::AlreadyTransferred { incident: existing });
            }
        };

        // The incident exists from here on; everything below degrades to
        // warnings instead of errors
        let mut warnings = Vec::new();

        if !ticket.attachments.is_empty() {
            let report = self.migrator.migrate(incident.id, &ticket.attachments).await;
            for failure in &report.failures {
                warnings.push(format!(
                    "attachment {} not migrated: {}",
                    failure.source_ref, failure.error
                ));
            }
            if !report.migrated.is_empty() {
                if let Err(e) = registry::update_incident_attachments(
                    &self.registry,
                    incident.id,
                    &report.migrated,
                )
                .await
                {
                    warnings.push(format!("attachment refs not updated: {}", e));
                }
            }
        }

        match agent::mark_transferred(&self.agent, &self.agent_table, &raw, actor).await {
            Ok(true) => {}
            Ok(false) => warnings.push(
                "agent schema has no resolution column; ticket hidden via ledger only"
                    .to_string(),
            ),
            Err(e) => warnings.push(format!("source ticket not marked: {}", e)),
        }

        info!(
            ingestion_id = %ingestion_id,
            incident_id = %incident.id,
            actor = %actor,
            warnings = warnings.len(),
            "Ticket promoted"
        );
        if !warnings.is_empty() {
            warn!(ingestion_id = %ingestion_id, ?warnings, "Promotion completed with warnings");
        }

        self.event_bus.emit_lossy(BridgeEvent::TicketPromoted {
            ingestion_id: ingestion_id.to_string(),
            incident_id: incident.id,
            actor: actor.to_string(),
            warnings: warnings.clone(),
            timestamp: Utc::now(),
        });
        self.event_bus.emit_lossy(BridgeEvent::StoreChanged {
            source: StoreSource::Registry,
            timestamp: Utc::now(),
        });
        self.event_bus.emit_lossy(BridgeEvent::StoreChanged {
            source: StoreSource::AgentStore,
            timestamp: Utc::now(),
        });

        Ok(TransferOutcome::Created { incident, warnings })
    }
}
