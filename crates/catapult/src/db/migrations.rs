//! Versioned catalog schema.
//!
//! The highest version recorded in `_migrations` is the catalog's schema
//! version; newer entries of `MIGRATIONS` are applied in order when a
//! process opens the catalog.

use rusqlite::{params, Connection};
use tracing::{debug, info};

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
    kind: MigrationKind,
}

enum MigrationKind {
    Standard,
    /// Skipped when the column is already there.
    AddColumn {
        table: &'static str,
        column: &'static str,
    },
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_catalog_tables",
        sql: include_str!("sql/001_create_catalog.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 2,
        description: "create_job_tables",
        sql: include_str!("sql/002_create_jobs.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 3,
        description: "create_result_tables",
        sql: include_str!("sql/003_create_results.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 4,
        description: "add_params_to_workers",
        sql: include_str!("sql/004_add_worker_params.sql"),
        kind: MigrationKind::AddColumn {
            table: "workers",
            column: "params",
        },
    },
];

/// Applies every migration newer than the recorded catalog version.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(TRACKING_TABLE)?;
    let applied = recorded_version(conn)?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        apply(conn, migration)?;
    }
    Ok(())
}

const TRACKING_TABLE: &str = "CREATE TABLE IF NOT EXISTS _migrations (
    version INTEGER PRIMARY KEY,
    description TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);";

fn recorded_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |r| r.get(0))?)
}

/// One migration and its bookkeeping row, atomically. Another process may
/// have recorded the same version in the meantime; that row is kept.
fn apply(conn: &Connection, migration: &Migration) -> Result<(), DatabaseError> {
    let failed = |e: rusqlite::Error| DatabaseError::Migration {
        version: migration.version,
        reason: e.to_string(),
    };

    let needed = match migration.kind {
        MigrationKind::Standard => true,
        MigrationKind::AddColumn { table, column } => !column_exists(conn, table, column)?,
    };

    conn.execute_batch("SAVEPOINT migration").map_err(failed)?;
    let result: Result<(), rusqlite::Error> = (|| {
        if needed {
            info!("Applying catalog migration v{} ({})", migration.version, migration.description);
            conn.execute_batch(migration.sql)?;
        } else {
            debug!("Catalog migration v{} already in place", migration.version);
        }
        conn.execute(
            "INSERT OR IGNORE INTO _migrations (version, description) VALUES (?1, ?2)",
            params![migration.version, migration.description],
        )?;
        Ok(())
    })();

    match result {
        Ok(()) => conn.execute_batch("RELEASE migration").map_err(failed),
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK TO migration; RELEASE migration");
            Err(failed(e))
        }
    }
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, DatabaseError> {
    if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DatabaseError::Migration {
            version: 0,
            reason: format!("Invalid table name: {}", table),
        });
    }
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let mut names = stmt.query_map([], |row| row.get::<_, String>("name"))?;
    Ok(names.any(|name| matches!(name, Ok(name) if name == column)))
}
