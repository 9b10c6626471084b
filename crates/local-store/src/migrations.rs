//! Local store migrations.
//!
//! Migrations are run in order and tracked in the `migrations` table.

use crate::StoreResult;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> StoreResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    debug!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_entities(conn)?;
    }
    if current_version < 2 {
        migrate_v2_unique_server_ids(conn)?;
    }

    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: syncable entities.
fn migrate_v1_entities(conn: &Connection) -> StoreResult<()> {
    info!("Applying migration v1: entities");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS entities (
            local_id INTEGER PRIMARY KEY AUTOINCREMENT,
            server_id INTEGER,
            account_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            fields TEXT NOT NULL DEFAULT '{}',
            tombstone INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_entities_account_kind
            ON entities(account_id, kind);
        CREATE INDEX IF NOT EXISTS idx_entities_tombstone
            ON entities(account_id, tombstone);
        ",
    )?;

    record_migration(conn, 1, "entities")
}

/// V2: one row per server entity.
fn migrate_v2_unique_server_ids(conn: &Connection) -> StoreResult<()> {
    info!("Applying migration v2: unique server ids");

    conn.execute_batch(
        "
        CREATE UNIQUE INDEX IF NOT EXISTS idx_entities_server_id
            ON entities(account_id, kind, server_id)
            WHERE server_id IS NOT NULL;
        ",
    )?;

    record_migration(conn, 2, "unique_server_ids")
}
