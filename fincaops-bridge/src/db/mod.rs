//! Database access for the bridge
//!
//! Two independent SQLite pools: the canonical registry (system of record)
//! and the agent-owned ingestion store. The registry schema is ours to
//! initialize; the agent store is opened as-is and never migrated.

pub mod agent;
pub mod registry;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Open the registry database and initialize the bridge-owned tables
pub async fn init_registry_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to registry database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_registry_tables(&pool).await?;

    Ok(pool)
}

/// Open the agent store
///
/// No schema initialization: the agent owns this database and we must not
/// reshape it. `mode=rw` so a missing file fails loudly instead of creating
/// an empty store the agent never writes to.
pub async fn init_agent_pool(db_path: &Path) -> Result<SqlitePool> {
    let db_url = format!("sqlite://{}?mode=rw", db_path.display());
    tracing::debug!("Connecting to agent store: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    Ok(pool)
}

/// Initialize bridge-owned registry tables
///
/// `communities` and `operators` belong to the wider console; they are
/// created here only so a fresh development database is usable. `incidents`
/// and `transfers` are this service's: the UNIQUE constraint on
/// `source_ingestion_id` is the idempotency anchor for promotion, and
/// `transfers` is the audit ledger written in the same transaction as each
/// incident.
async fn init_registry_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS communities (
            id INTEGER PRIMARY KEY,
            display_code TEXT NOT NULL DEFAULT '',
            name TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS operators (
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL DEFAULT '',
            is_active INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS incidents (
            id TEXT PRIMARY KEY,
            community_id INTEGER NOT NULL,
            client_name TEXT NOT NULL DEFAULT '',
            client_phone TEXT NOT NULL DEFAULT '',
            client_email TEXT NOT NULL DEFAULT '',
            message TEXT NOT NULL DEFAULT '',
            assignee_id TEXT NOT NULL,
            attachments TEXT NOT NULL DEFAULT '[]',
            source_ingestion_id TEXT NOT NULL UNIQUE,
            created_from TEXT NOT NULL DEFAULT 'ingestion',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transfers (
            ingestion_id TEXT PRIMARY KEY,
            incident_id TEXT NOT NULL,
            actor TEXT NOT NULL,
            transferred_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Registry tables initialized (communities, operators, incidents, transfers)");

    Ok(())
}
