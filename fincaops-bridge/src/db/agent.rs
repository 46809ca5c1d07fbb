//! Dynamic access to the agent-owned ingestion store
//!
//! The agent's ticket table has no guaranteed schema, so every read is a
//! `SELECT *` decoded column-by-column into a string-keyed JSON map, and
//! every write touches only columns the normalizer has discovered on the
//! record being written. The untyped shape never leaves this module and the
//! normalizer.

use crate::normalizer::{self, LogicalField, RawTicket, ROWID_KEY};
use fincaops_common::{Error, Result};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, SqlitePool, ValueRef};

/// Validate an identifier before it is interpolated into SQL
///
/// Table name comes from config and column names from the agent's own
/// schema, but neither is trusted.
fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() < 100
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == ' ' || c == '-')
}

fn quoted(name: &str) -> Result<String> {
    if !is_safe_identifier(name) {
        return Err(Error::InvalidInput(format!("unsafe identifier: {:?}", name)));
    }
    Ok(format!("\"{}\"", name))
}

/// Fetch every ticket in the agent table as a raw record
///
/// The store-local rowid is injected under [`ROWID_KEY`] so records remain
/// addressable even when the agent table has no id column. Tables created
/// WITHOUT ROWID fall back to a plain `SELECT *`.
pub async fn fetch_all_tickets(pool: &SqlitePool, table: &str) -> Result<Vec<RawTicket>> {
    let table_sql = quoted(table)?;

    match fetch_and_decode(pool, &table_sql).await {
        Ok(tickets) => Ok(tickets),
        // A schema change between prepare and decode poisons the first
        // read; the next round trip prepares against the current schema
        Err(Error::Internal(_)) => fetch_and_decode(pool, &table_sql).await,
        Err(e) => Err(e),
    }
}

async fn fetch_and_decode(pool: &SqlitePool, table_sql: &str) -> Result<Vec<RawTicket>> {
    let rows = match sqlx::query(&format!(
        "SELECT rowid AS {}, * FROM {}",
        ROWID_KEY, table_sql
    ))
    .fetch_all(pool)
    .await
    {
        Ok(rows) => rows,
        Err(_) => {
            sqlx::query(&format!("SELECT * FROM {}", table_sql))
                .fetch_all(pool)
                .await?
        }
    };

    rows.iter().map(row_to_raw).collect()
}

/// Re-read a single ticket by its normalized id
///
/// The id column itself is discovered per record, so the lookup filters the
/// full fetch through the normalizer rather than guessing a WHERE column.
/// Agent ticket tables are small (open tickets only); this stays cheap.
pub async fn fetch_ticket(
    pool: &SqlitePool,
    table: &str,
    ingestion_id: &str,
) -> Result<Option<RawTicket>> {
    let tickets = fetch_all_tickets(pool, table).await?;
    Ok(tickets
        .into_iter()
        .find(|raw| normalizer::normalize(raw).id == ingestion_id))
}

/// SQLite's connection-global change counter; bumps whenever another
/// connection commits a write to this database
pub async fn data_version(pool: &SqlitePool) -> Result<i64> {
    let version: i64 = sqlx::query_scalar("PRAGMA data_version")
        .fetch_one(pool)
        .await?;
    Ok(version)
}

/// Mark a ticket as transferred after promotion (protocol step 4)
///
/// Best-effort: sets whichever of the resolved / resolvedAt / resolvedBy
/// columns the agent schema actually has. Returns `false` when the schema
/// exposes none of them; the caller reports that as a warning and relies on
/// the registry ledger to keep the ticket out of the merged view.
pub async fn mark_transferred(
    pool: &SqlitePool,
    table: &str,
    raw: &RawTicket,
    actor: &str,
) -> Result<bool> {
    let now = chrono::Utc::now().to_rfc3339();
    let mut sets: Vec<(String, SqlArg)> = Vec::new();

    if let Some(key) = claim_key(raw, LogicalField::Resolved, &sets) {
        sets.push((key, SqlArg::Int(1)));
    }
    if let Some(key) = claim_key(raw, LogicalField::ResolvedAt, &sets) {
        sets.push((key, SqlArg::Text(now.clone())));
    }
    if let Some(key) = claim_key(raw, LogicalField::ResolvedBy, &sets) {
        sets.push((key, SqlArg::Text(actor.to_string())));
    }

    if sets.is_empty() {
        return Ok(false);
    }

    update_record(pool, table, raw, sets).await?;
    Ok(true)
}

/// Operator action: set or clear a ticket's resolution in place
pub async fn set_resolution(
    pool: &SqlitePool,
    table: &str,
    raw: &RawTicket,
    resolved: bool,
    actor: &str,
) -> Result<()> {
    let mut sets: Vec<(String, SqlArg)> = Vec::new();

    if let Some(key) = claim_key(raw, LogicalField::Resolved, &sets) {
        sets.push((key, SqlArg::Int(i64::from(resolved))));
    }
    if let Some(key) = claim_key(raw, LogicalField::ResolvedAt, &sets) {
        let value = if resolved {
            SqlArg::Text(chrono::Utc::now().to_rfc3339())
        } else {
            SqlArg::Null
        };
        sets.push((key, value));
    }
    if let Some(key) = claim_key(raw, LogicalField::ResolvedBy, &sets) {
        let value = if resolved {
            SqlArg::Text(actor.to_string())
        } else {
            SqlArg::Text(String::new())
        };
        sets.push((key, value));
    }

    if sets.is_empty() {
        return Err(Error::NotFound(
            "agent schema has no resolution column".to_string(),
        ));
    }

    update_record(pool, table, raw, sets).await
}

/// Operator action: replace a ticket's attachment list
pub async fn update_attachments(
    pool: &SqlitePool,
    table: &str,
    raw: &RawTicket,
    refs: &[String],
) -> Result<()> {
    let key = normalizer::discover_key(raw, LogicalField::Attachments).ok_or_else(|| {
        Error::NotFound("agent schema has no attachments column".to_string())
    })?;

    let json = serde_json::to_string(refs)
        .map_err(|e| Error::Internal(format!("serialize attachments: {}", e)))?;

    update_record(pool, table, raw, vec![(key.to_string(), SqlArg::Text(json))]).await
}

/// Key discovery for writes, refusing keys an earlier field already took
///
/// The resolution fields share pattern fragments ("resuel" matches both a
/// bare resuelto flag and a resuelto_por column), so without this a schema
/// that only has the flag would get a timestamp written into it.
fn claim_key(raw: &RawTicket, field: LogicalField, taken: &[(String, SqlArg)]) -> Option<String> {
    normalizer::discover_key(raw, field)
        .filter(|key| !taken.iter().any(|(t, _)| t == key))
        .map(str::to_string)
}

/// Dynamic bind argument for agent-store writes
enum SqlArg {
    Text(String),
    Int(i64),
    Null,
}

/// Build and run an UPDATE against the discovered columns of one record
async fn update_record(
    pool: &SqlitePool,
    table: &str,
    raw: &RawTicket,
    sets: Vec<(String, SqlArg)>,
) -> Result<()> {
    let table_sql = quoted(table)?;
    let (where_sql, where_arg) = locate(raw)?;

    let set_sql = sets
        .iter()
        .map(|(col, _)| quoted(col).map(|q| format!("{} = ?", q)))
        .collect::<Result<Vec<_>>>()?
        .join(", ");

    let sql = format!("UPDATE {} SET {} WHERE {} = ?", table_sql, set_sql, where_sql);

    let mut query = sqlx::query(&sql);
    for (_, arg) in &sets {
        query = match arg {
            SqlArg::Text(s) => query.bind(s.clone()),
            SqlArg::Int(i) => query.bind(*i),
            SqlArg::Null => query.bind(Option::<String>::None),
        };
    }
    query = match where_arg {
        SqlArg::Text(s) => query.bind(s),
        SqlArg::Int(i) => query.bind(i),
        SqlArg::Null => unreachable!("locate never yields null"),
    };

    let result = query.execute(pool).await?;
    if result.rows_affected() == 0 {
        return Err(Error::NotFound("ticket vanished before update".to_string()));
    }

    Ok(())
}

/// How to address this record in a WHERE clause: rowid when we have it,
/// else the discovered id column
fn locate(raw: &RawTicket) -> Result<(String, SqlArg)> {
    if let Some(Value::Number(n)) = raw.get(ROWID_KEY) {
        if let Some(rowid) = n.as_i64() {
            return Ok(("rowid".to_string(), SqlArg::Int(rowid)));
        }
    }

    if let Some(key) = normalizer::discover_key(raw, LogicalField::Id) {
        if key != ROWID_KEY {
            let arg = match raw.get(key) {
                Some(Value::String(s)) => SqlArg::Text(s.clone()),
                Some(Value::Number(n)) if n.is_i64() => {
                    SqlArg::Int(n.as_i64().unwrap_or_default())
                }
                _ => return Err(Error::InvalidInput("unusable id column value".to_string())),
            };
            return Ok((quoted(key)?, arg));
        }
    }

    Err(Error::InvalidInput(
        "agent record has neither rowid nor id column".to_string(),
    ))
}

/// Decode one SQLite row into a raw JSON map
///
/// A column dropped from the table between fetches can leave the row's
/// column metadata describing more slots than the row actually holds, and
/// indexed access then panics instead of erroring. The decode is pure over
/// the fetched row, so the panic is contained here and surfaced as an error
/// the fetch path retries.
fn row_to_raw(row: &SqliteRow) -> Result<RawTicket> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| decode_columns(row)))
        .map_err(|_| Error::Internal("agent row decode raced a schema change".to_string()))
}

/// SQLite values are dynamically typed per cell, so the decode follows each
/// value's own storage class rather than any declared column type. BLOBs are
/// not representable in the normalized shape and map to null.
fn decode_columns(row: &SqliteRow) -> RawTicket {
    use sqlx::TypeInfo;

    let mut map = RawTicket::new();

    for (i, column) in row.columns().iter().enumerate() {
        let value = match row.try_get_raw(i) {
            Ok(raw_value) if raw_value.is_null() => Value::Null,
            Ok(raw_value) => match raw_value.type_info().name() {
                "INTEGER" => row.try_get::<i64, _>(i).map(Value::from).unwrap_or(Value::Null),
                "REAL" => row.try_get::<f64, _>(i).map(Value::from).unwrap_or(Value::Null),
                "TEXT" => row
                    .try_get::<String, _>(i)
                    .map(Value::from)
                    .unwrap_or(Value::Null),
                // BOOLEAN shows up when the column was declared that way
                "BOOLEAN" => row.try_get::<bool, _>(i).map(Value::from).unwrap_or(Value::Null),
                _ => Value::Null,
            },
            Err(_) => Value::Null,
        };
        map.insert(column.name().to_string(), value);
    }

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pool_with(schema: &str, insert: &str) -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(schema).execute(&pool).await.unwrap();
        sqlx::query(insert).execute(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_fetch_preserves_storage_classes() {
        let pool = pool_with(
            "CREATE TABLE tickets (id TEXT, prioridad INTEGER, coste REAL, mensaje TEXT)",
            "INSERT INTO tickets VALUES ('tk-1', 3, 19.5, 'Fuga'), ('tk-2', NULL, NULL, NULL)",
        )
        .await;

        let tickets = fetch_all_tickets(&pool, "tickets").await.unwrap();
        assert_eq!(tickets.len(), 2);

        let first = &tickets[0];
        assert_eq!(first.get("id"), Some(&Value::from("tk-1")));
        assert_eq!(first.get("prioridad"), Some(&Value::from(3)));
        assert_eq!(first.get("coste"), Some(&Value::from(19.5)));
        assert!(first.contains_key(normalizer::ROWID_KEY));

        assert_eq!(tickets[1].get("mensaje"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_fetch_without_rowid_uses_plain_select() {
        // WITHOUT ROWID tables reject the rowid alias
        let pool = pool_with(
            "CREATE TABLE tickets (id TEXT PRIMARY KEY, mensaje TEXT) WITHOUT ROWID",
            "INSERT INTO tickets VALUES ('tk-1', 'Fuga')",
        )
        .await;

        let tickets = fetch_all_tickets(&pool, "tickets").await.unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].get("id"), Some(&Value::from("tk-1")));
    }

    #[tokio::test]
    async fn test_fetch_survives_column_drop_between_reads() {
        let pool = pool_with(
            "CREATE TABLE tickets (id TEXT PRIMARY KEY, mensaje TEXT, resuelto INTEGER DEFAULT 0)",
            "INSERT INTO tickets (id, mensaje) VALUES ('tk-1', 'Fuga')",
        )
        .await;

        let before = fetch_all_tickets(&pool, "tickets").await.unwrap();
        assert!(before[0].contains_key("resuelto"));

        sqlx::query("ALTER TABLE tickets DROP COLUMN resuelto")
            .execute(&pool)
            .await
            .unwrap();

        // Stale column metadata from the pre-drop fetch must not surface as
        // a panic; the read sees the current shape
        let after = fetch_all_tickets(&pool, "tickets").await.unwrap();
        assert_eq!(after.len(), 1);
        assert!(!after[0].contains_key("resuelto"));
        assert_eq!(after[0].get("mensaje"), Some(&Value::from("Fuga")));
    }

    #[tokio::test]
    async fn test_mark_transferred_on_flag_only_schema() {
        // Only a bare boolean flag; the timestamp and actor fields must not
        // steal it through their looser patterns
        let pool = pool_with(
            "CREATE TABLE tickets (id TEXT PRIMARY KEY, mensaje TEXT, resuelto INTEGER DEFAULT 0)",
            "INSERT INTO tickets (id, mensaje) VALUES ('tk-1', 'Fuga')",
        )
        .await;
        let raw = fetch_ticket(&pool, "tickets", "tk-1").await.unwrap().unwrap();

        let marked = mark_transferred(&pool, "tickets", &raw, "admin").await.unwrap();
        assert!(marked);

        let (resolved,): (i64,) = sqlx::query_as("SELECT resuelto FROM tickets WHERE id = 'tk-1'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(resolved, 1);
    }

    #[tokio::test]
    async fn test_mark_transferred_fills_all_resolution_columns() {
        let pool = pool_with(
            "CREATE TABLE tickets (id TEXT PRIMARY KEY, resuelto INTEGER DEFAULT 0, \
             fecha_resolucion TEXT, resuelto_por TEXT)",
            "INSERT INTO tickets (id) VALUES ('tk-1')",
        )
        .await;
        let raw = fetch_ticket(&pool, "tickets", "tk-1").await.unwrap().unwrap();

        assert!(mark_transferred(&pool, "tickets", &raw, "admin").await.unwrap());

        let (resolved, at, by): (i64, Option<String>, Option<String>) = sqlx::query_as(
            "SELECT resuelto, fecha_resolucion, resuelto_por FROM tickets WHERE id = 'tk-1'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(resolved, 1);
        assert!(at.is_some());
        assert_eq!(by.as_deref(), Some("admin"));
    }

    #[tokio::test]
    async fn test_mark_transferred_without_resolution_columns() {
        let pool = pool_with(
            "CREATE TABLE tickets (id TEXT PRIMARY KEY, mensaje TEXT)",
            "INSERT INTO tickets VALUES ('tk-1', 'Fuga')",
        )
        .await;
        let raw = fetch_ticket(&pool, "tickets", "tk-1").await.unwrap().unwrap();

        let marked = mark_transferred(&pool, "tickets", &raw, "admin").await.unwrap();
        assert!(!marked, "no column to mark is reported, not an error");
    }

    #[tokio::test]
    async fn test_set_resolution_clear_reopens_ticket() {
        let pool = pool_with(
            "CREATE TABLE tickets (id TEXT PRIMARY KEY, resuelto INTEGER DEFAULT 0)",
            "INSERT INTO tickets (id, resuelto) VALUES ('tk-1', 1)",
        )
        .await;
        let raw = fetch_ticket(&pool, "tickets", "tk-1").await.unwrap().unwrap();

        set_resolution(&pool, "tickets", &raw, false, "admin").await.unwrap();

        let (resolved,): (i64,) = sqlx::query_as("SELECT resuelto FROM tickets WHERE id = 'tk-1'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(resolved, 0);
    }

    #[tokio::test]
    async fn test_update_attachments_requires_a_column() {
        let pool = pool_with(
            "CREATE TABLE tickets (id TEXT PRIMARY KEY, adjuntos TEXT)",
            "INSERT INTO tickets (id) VALUES ('tk-1')",
        )
        .await;
        let raw = fetch_ticket(&pool, "tickets", "tk-1").await.unwrap().unwrap();

        update_attachments(&pool, "tickets", &raw, &["a.jpg".to_string()]).await.unwrap();
        let (json,): (String,) = sqlx::query_as("SELECT adjuntos FROM tickets WHERE id = 'tk-1'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(json, "[\"a.jpg\"]");

        let pool = pool_with(
            "CREATE TABLE tickets (id TEXT PRIMARY KEY, mensaje TEXT)",
            "INSERT INTO tickets VALUES ('tk-1', 'Fuga')",
        )
        .await;
        let raw = fetch_ticket(&pool, "tickets", "tk-1").await.unwrap().unwrap();
        let err = update_attachments(&pool, "tickets", &raw, &[]).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unsafe_table_name_rejected() {
        let pool = pool_with("CREATE TABLE t (id TEXT)", "INSERT INTO t VALUES ('x')").await;
        let err = fetch_all_tickets(&pool, "t; DROP TABLE t").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
