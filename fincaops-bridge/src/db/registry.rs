//! Typed access to the canonical registry (system of record)

use chrono::{DateTime, Utc};
use fincaops_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

/// Canonical community, owned and mutated by the wider console
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Community {
    pub id: i64,
    pub display_code: String,
    pub name: String,
}

/// Canonical operator; inactive operators are excluded from resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operator {
    pub id: String,
    pub display_name: String,
    pub is_active: bool,
}

/// Incident row created by a successful promotion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub community_id: i64,
    pub client_name: String,
    pub client_phone: String,
    pub client_email: String,
    pub message: String,
    pub assignee_id: String,
    pub attachments: Vec<String>,
    pub source_ingestion_id: String,
    pub created_from: String,
    pub created_at: DateTime<Utc>,
}

/// Incident fields supplied by the transfer coordinator
#[derive(Debug, Clone)]
pub struct NewIncident {
    pub community_id: i64,
    pub client_name: String,
    pub client_phone: String,
    pub client_email: String,
    pub message: String,
    pub assignee_id: String,
    pub attachments: Vec<String>,
    pub source_ingestion_id: String,
}

/// Outcome of an incident insert attempt
#[derive(Debug)]
pub enum InsertOutcome {
    /// Row created; ledger entry written in the same transaction
    Created(Incident),
    /// The unique constraint on source_ingestion_id fired: this ticket was
    /// already promoted (possibly by a concurrent call or another process)
    DuplicateSource,
}

pub async fn list_communities(pool: &SqlitePool) -> Result<Vec<Community>> {
    let rows = sqlx::query_as::<_, (i64, String, String)>(
        "SELECT id, display_code, name FROM communities ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, display_code, name)| Community {
            id,
            display_code,
            name,
        })
        .collect())
}

pub async fn list_operators(pool: &SqlitePool) -> Result<Vec<Operator>> {
    let rows = sqlx::query_as::<_, (String, String, i64)>(
        "SELECT id, display_name, is_active FROM operators ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, display_name, is_active)| Operator {
            id,
            display_name,
            is_active: is_active != 0,
        })
        .collect())
}

/// All incidents, newest first, for the registry side of the live view
pub async fn list_incidents(pool: &SqlitePool) -> Result<Vec<Incident>> {
    let rows = sqlx::query_as::<_, IncidentRow>(
        "SELECT id, community_id, client_name, client_phone, client_email, message, \
         assignee_id, attachments, source_ingestion_id, created_from, created_at \
         FROM incidents ORDER BY created_at DESC",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(IncidentRow::into_incident).collect()
}

/// Look up the incident a given ingestion ticket was promoted to, if any
pub async fn find_incident_by_source(
    pool: &SqlitePool,
    ingestion_id: &str,
) -> Result<Option<Incident>> {
    let row = sqlx::query_as::<_, IncidentRow>(
        "SELECT id, community_id, client_name, client_phone, client_email, message, \
         assignee_id, attachments, source_ingestion_id, created_from, created_at \
         FROM incidents WHERE source_ingestion_id = ?",
    )
    .bind(ingestion_id)
    .fetch_optional(pool)
    .await?;

    row.map(IncidentRow::into_incident).transpose()
}

/// Ingestion ids that already have an incident anchored to them
///
/// The live view subtracts these from the agent side, so a ticket whose
/// source-store mark failed still disappears from the merged view.
pub async fn promoted_source_ids(pool: &SqlitePool) -> Result<Vec<String>> {
    let rows =
        sqlx::query_as::<_, (String,)>("SELECT source_ingestion_id FROM incidents")
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Insert an incident together with its ledger row in one transaction
///
/// The UNIQUE constraint on `source_ingestion_id` makes this the
/// serialization point for concurrent promotions of the same ticket: the
/// loser gets `DuplicateSource` and must re-read the existing incident.
pub async fn insert_incident(
    pool: &SqlitePool,
    new: &NewIncident,
    actor: &str,
) -> Result<InsertOutcome> {
    let incident = Incident {
        id: Uuid::new_v4(),
        community_id: new.community_id,
        client_name: new.client_name.clone(),
        client_phone: new.client_phone.clone(),
        client_email: new.client_email.clone(),
        message: new.message.clone(),
        assignee_id: new.assignee_id.clone(),
        attachments: new.attachments.clone(),
        source_ingestion_id: new.source_ingestion_id.clone(),
        created_from: "ingestion".to_string(),
        created_at: Utc::now(),
    };

    let attachments_json = serde_json::to_string(&incident.attachments)
        .map_err(|e| Error::Internal(format!("serialize attachments: {}", e)))?;

    let mut tx = pool.begin().await?;

    let insert = sqlx::query(
        "INSERT INTO incidents (id, community_id, client_name, client_phone, client_email, \
         message, assignee_id, attachments, source_ingestion_id, created_from, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(incident.id.to_string())
    .bind(incident.community_id)
    .bind(&incident.client_name)
    .bind(&incident.client_phone)
    .bind(&incident.client_email)
    .bind(&incident.message)
    .bind(&incident.assignee_id)
    .bind(&attachments_json)
    .bind(&incident.source_ingestion_id)
    .bind(&incident.created_from)
    .bind(incident.created_at.to_rfc3339())
    .execute(&mut *tx)
    .await;

    if let Err(e) = insert {
        tx.rollback().await.ok();
        if is_unique_violation(&e) {
            return Ok(InsertOutcome::DuplicateSource);
        }
        return Err(e.into());
    }

    sqlx::query(
        "INSERT INTO transfers (ingestion_id, incident_id, actor, transferred_at) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(&incident.source_ingestion_id)
    .bind(incident.id.to_string())
    .bind(actor)
    .bind(incident.created_at.to_rfc3339())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(InsertOutcome::Created(incident))
}

/// Replace an incident's attachment list after migration
pub async fn update_incident_attachments(
    pool: &SqlitePool,
    incident_id: Uuid,
    attachments: &[String],
) -> Result<()> {
    let attachments_json = serde_json::to_string(attachments)
        .map_err(|e| Error::Internal(format!("serialize attachments: {}", e)))?;

    sqlx::query("UPDATE incidents SET attachments = ? WHERE id = ?")
        .bind(&attachments_json)
        .bind(incident_id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

/// Raw incident row as stored; attachments are a JSON text column
#[derive(sqlx::FromRow)]
struct IncidentRow {
    id: String,
    community_id: i64,
    client_name: String,
    client_phone: String,
    client_email: String,
    message: String,
    assignee_id: String,
    attachments: String,
    source_ingestion_id: String,
    created_from: String,
    created_at: String,
}

impl IncidentRow {
    fn into_incident(self) -> Result<Incident> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| Error::Internal(format!("bad incident id {}: {}", self.id, e)))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| Error::Internal(format!("bad incident timestamp: {}", e)))?
            .with_timezone(&Utc);
        let attachments: Vec<String> =
            serde_json::from_str(&self.attachments).unwrap_or_default();

        Ok(Incident {
            id,
            community_id: self.community_id,
            client_name: self.client_name,
            client_phone: self.client_phone,
            client_email: self.client_email,
            message: self.message,
            assignee_id: self.assignee_id,
            attachments,
            source_ingestion_id: self.source_ingestion_id,
            created_from: self.created_from,
            created_at,
        })
    }
}
