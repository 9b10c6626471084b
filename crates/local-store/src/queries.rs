//! Standalone query functions over a `&Connection`.

use crate::{
    EntityFilter, EntityKind, Fields, LocalId, NewEntity, ServerIdFilter, StoreError, StoreResult,
    SyncableEntity,
};
use chrono::{DateTime, SecondsFormat, Utc};
use credential_store::AccountId;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, Row};
use tracing::debug;

const ENTITY_COLUMNS: &str =
    "local_id, server_id, account_id, kind, fields, tombstone, created_at, updated_at";

/// Insert a new row and return it.
pub fn insert_entity(conn: &Connection, entity: &NewEntity) -> StoreResult<SyncableEntity> {
    let now = timestamp(Utc::now());
    let fields = serde_json::to_string(&entity.fields)?;
    conn.execute(
        "INSERT INTO entities (server_id, account_id, kind, fields, tombstone, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)",
        params![
            entity.server_id,
            entity.account_id.as_str(),
            entity.kind.as_str(),
            fields,
            now,
        ],
    )?;
    let local_id = conn.last_insert_rowid();
    get_entity(conn, local_id)?.ok_or(StoreError::NotFound(local_id))
}

/// Get a row by local id.
pub fn get_entity(conn: &Connection, local_id: LocalId) -> StoreResult<Option<SyncableEntity>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {ENTITY_COLUMNS} FROM entities WHERE local_id = ?1"
    ))?;

    let result = stmt.query_row(params![local_id], read_row);
    match result {
        Ok(row) => Ok(Some(decode(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Merge `fields` into the row's fields. Keys present in `fields` win.
pub fn update_fields(
    conn: &Connection,
    local_id: LocalId,
    fields: &Fields,
) -> StoreResult<SyncableEntity> {
    let mut entity = get_entity(conn, local_id)?.ok_or(StoreError::NotFound(local_id))?;
    for (key, value) in fields {
        entity.fields.insert(key.clone(), value.clone());
    }

    let now = Utc::now();
    conn.execute(
        "UPDATE entities SET fields = ?1, updated_at = ?2 WHERE local_id = ?3",
        params![serde_json::to_string(&entity.fields)?, timestamp(now), local_id],
    )?;
    entity.updated_at = now;
    Ok(entity)
}

/// Physically remove a row. Returns whether it existed.
pub fn delete_entity(conn: &Connection, local_id: LocalId) -> StoreResult<bool> {
    let affected = conn.execute("DELETE FROM entities WHERE local_id = ?1", params![local_id])?;
    Ok(affected > 0)
}

/// Set the tombstone flag. Returns whether the flag changed.
pub fn set_tombstone(conn: &Connection, local_id: LocalId, tombstone: bool) -> StoreResult<bool> {
    let affected = conn.execute(
        "UPDATE entities SET tombstone = ?1, updated_at = ?2
         WHERE local_id = ?3 AND tombstone != ?1",
        params![tombstone, timestamp(Utc::now()), local_id],
    )?;
    if affected > 0 {
        return Ok(true);
    }

    // Unchanged, or no such row.
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM entities WHERE local_id = ?1)",
        params![local_id],
        |row| row.get(0),
    )?;
    if exists {
        Ok(false)
    } else {
        Err(StoreError::NotFound(local_id))
    }
}

/// Record the server id confirmed for a row.
///
/// A refresh may already have inserted a row for `server_id` while the
/// upload was in flight. That duplicate is folded into `local_id`: it is
/// deleted and its tombstone, if set, carries over. Returns the updated row
/// and the local id of the folded duplicate.
pub fn assign_server_id(
    conn: &Connection,
    local_id: LocalId,
    server_id: i64,
) -> StoreResult<(SyncableEntity, Option<LocalId>)> {
    let tx = conn.unchecked_transaction()?;

    let Some(entity) = get_entity(&tx, local_id)? else {
        return Err(StoreError::NotFound(local_id));
    };
    let duplicate = query_entities(
        &tx,
        &EntityFilter::for_account(&entity.account_id)
            .with_kind(entity.kind)
            .with_server_id(server_id),
    )?
    .into_iter()
    .find(|row| row.local_id != local_id);

    let mut tombstone = entity.tombstone;
    if let Some(row) = &duplicate {
        tx.execute("DELETE FROM entities WHERE local_id = ?1", params![row.local_id])?;
        tombstone |= row.tombstone;
        debug!(local_id, folded = row.local_id, server_id, "Folded fetched duplicate");
    }

    tx.execute(
        "UPDATE entities SET server_id = ?1, tombstone = ?2, updated_at = ?3 WHERE local_id = ?4",
        params![server_id, tombstone, timestamp(Utc::now()), local_id],
    )?;
    let updated = get_entity(&tx, local_id)?.ok_or(StoreError::NotFound(local_id))?;
    tx.commit()?;

    Ok((updated, duplicate.map(|row| row.local_id)))
}

/// Select rows matching `filter`, oldest first.
pub fn query_entities(conn: &Connection, filter: &EntityFilter) -> StoreResult<Vec<SyncableEntity>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<SqlValue> = Vec::new();

    if let Some(account_id) = &filter.account_id {
        clauses.push("account_id = ?");
        values.push(SqlValue::Text(account_id.as_str().to_string()));
    }
    if let Some(kind) = filter.kind {
        clauses.push("kind = ?");
        values.push(SqlValue::Text(kind.as_str().to_string()));
    }
    if let Some(tombstone) = filter.tombstone {
        clauses.push("tombstone = ?");
        values.push(SqlValue::Integer(i64::from(tombstone)));
    }
    match filter.server_id {
        ServerIdFilter::Any => {}
        ServerIdFilter::Unassigned => clauses.push("server_id IS NULL"),
        ServerIdFilter::Assigned => clauses.push("server_id IS NOT NULL"),
        ServerIdFilter::Is(server_id) => {
            clauses.push("server_id = ?");
            values.push(SqlValue::Integer(server_id));
        }
    }

    let mut sql = format!("SELECT {ENTITY_COLUMNS} FROM entities");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY created_at ASC, local_id ASC");

    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values), read_row)?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter().map(decode).collect()
}

/// Remove every row belonging to an account. Returns the number removed.
pub fn delete_account_entities(conn: &Connection, account_id: &AccountId) -> StoreResult<usize> {
    let removed = conn.execute(
        "DELETE FROM entities WHERE account_id = ?1",
        params![account_id.as_str()],
    )?;
    debug!(account = %account_id, removed, "Account rows removed");
    Ok(removed)
}

/// Raw column values; decoded outside the rusqlite row callback so JSON and
/// enum errors surface as `StoreError`.
struct RawRow {
    local_id: i64,
    server_id: Option<i64>,
    account_id: String,
    kind: String,
    fields: String,
    tombstone: bool,
    created_at: String,
    updated_at: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        local_id: row.get(0)?,
        server_id: row.get(1)?,
        account_id: row.get(2)?,
        kind: row.get(3)?,
        fields: row.get(4)?,
        tombstone: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn decode(raw: RawRow) -> StoreResult<SyncableEntity> {
    let kind: EntityKind = raw.kind.parse().map_err(StoreError::InvalidData)?;
    Ok(SyncableEntity {
        local_id: raw.local_id,
        server_id: raw.server_id,
        account_id: AccountId::new(raw.account_id),
        kind,
        fields: serde_json::from_str(&raw.fields)?,
        tombstone: raw.tombstone,
        created_at: parse_datetime(&raw.created_at),
        updated_at: parse_datetime(&raw.updated_at),
    })
}

/// Fixed-width RFC 3339 so that text order is time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
