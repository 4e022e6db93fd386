//! Schema migration runner (grounded on the teacher's
//! `tron-events::sqlite::migrations` module: versioned SQL embedded at
//! compile time, applied in order inside transactions).

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::{Result, StoreError};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "sessions, messages, bindings tables",
    sql: include_str!("v001_schema.sql"),
}];

/// Run all pending migrations on the given connection. Idempotent.
pub fn run_migrations(conn: &Connection) -> Result<u32> {
    ensure_version_table(conn)?;
    let current = current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version <= current {
            debug!(version = migration.version, "migration already applied");
            continue;
        }
        info!(version = migration.version, description = migration.description, "applying migration");
        apply_migration(conn, migration)?;
        applied += 1;
    }
    Ok(applied)
}

fn current_version(conn: &Connection) -> Result<u32> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| row.get(0))
        .map_err(|e| StoreError::Migration(format!("failed to read schema_version: {e}")))
}

fn ensure_version_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
           version     INTEGER PRIMARY KEY,
           applied_at  TEXT NOT NULL
         );",
    )
    .map_err(|e| StoreError::Migration(format!("failed to create schema_version table: {e}")))
}

fn apply_migration(conn: &Connection, migration: &Migration) -> Result<()> {
    conn.execute_batch(migration.sql)
        .map_err(|e| StoreError::Migration(format!("v{:03}: {e}", migration.version)))?;
    conn.execute(
        "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![migration.version, chrono::Utc::now().to_rfc3339()],
    )?;
    Ok(())
}
