//! Registered worker processes.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

#[derive(Debug, Clone)]
pub struct WorkerRow {
    pub id: i64,
    pub name: String,
    pub hostname: String,
    pub status: String,
    pub system_info: Option<String>,
    pub params: Option<String>,
    pub last_seen: Option<String>,
    pub created_at: String,
}

impl WorkerRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            hostname: row.get("hostname")?,
            status: row.get("status")?,
            system_info: row.get("system_info")?,
            params: row.get("params")?,
            last_seen: row.get("last_seen")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Registers a worker by name, refreshing hostname, status and info if it
/// already exists.
pub fn upsert(
    conn: &Connection,
    name: &str,
    hostname: &str,
    status: &str,
    system_info: Option<&str>,
    worker_params: Option<&str>,
) -> Result<WorkerRow, DatabaseError> {
    let now = super::now();
    conn.execute(
        "INSERT INTO workers (name, hostname, status, system_info, params, last_seen, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
         ON CONFLICT(name) DO UPDATE SET
            hostname = excluded.hostname,
            status = excluded.status,
            system_info = COALESCE(excluded.system_info, workers.system_info),
            params = COALESCE(excluded.params, workers.params),
            last_seen = excluded.last_seen",
        params![name, hostname, status, system_info, worker_params, now],
    )?;
    find_by_name(conn, name)?.ok_or_else(|| DatabaseError::NotFound {
        entity: "worker",
        id: name.to_string(),
    })
}

pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<WorkerRow>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM workers WHERE name = ?1",
            params![name],
            WorkerRow::from_row,
        )
        .optional()?)
}

pub fn list(conn: &Connection) -> Result<Vec<WorkerRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM workers ORDER BY name")?;
    let rows = stmt
        .query_map([], WorkerRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn set_status(
    conn: &Connection,
    id: i64,
    status: &str,
    system_info: Option<&str>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE workers SET status = ?2, system_info = COALESCE(?3, system_info), last_seen = ?4
         WHERE id = ?1",
        params![id, status, system_info, super::now()],
    )?;
    Ok(())
}

pub fn touch(conn: &Connection, id: i64, now: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE workers SET last_seen = ?2 WHERE id = ?1",
        params![id, now],
    )?;
    Ok(())
}

/// Number of tasks this worker is currently running.
pub fn running_task_count(conn: &Connection, id: i64) -> Result<i64, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM tasks WHERE worker_id = ?1 AND status = 'running'",
        params![id],
        |r| r.get(0),
    )?)
}
