//! File records: one row per logical instrument output (single file or
//! `.d` bundle) under a watch location.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

#[derive(Debug, Clone)]
pub struct FileRow {
    pub id: i64,
    pub location_id: i64,
    pub experiment_id: i64,
    /// Path relative to the location root, `/`-separated.
    pub path: String,
    pub size: i64,
    pub is_bundle: bool,
    pub ready: bool,
    pub processing: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl FileRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            location_id: row.get("location_id")?,
            experiment_id: row.get("experiment_id")?,
            path: row.get("path")?,
            size: row.get("size")?,
            is_bundle: row.get("is_bundle")?,
            ready: row.get("ready")?,
            processing: row.get("processing")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewFile<'a> {
    pub location_id: i64,
    pub experiment_id: i64,
    pub path: &'a str,
    pub size: i64,
    pub is_bundle: bool,
}

/// What an upsert did to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created(i64),
    Resized(i64),
    Unchanged(i64),
}

impl UpsertOutcome {
    pub fn id(&self) -> i64 {
        match *self {
            UpsertOutcome::Created(id) | UpsertOutcome::Resized(id) | UpsertOutcome::Unchanged(id) => id,
        }
    }
}

/// Creates the record, or refreshes its size if it already exists.
///
/// Readiness is never touched here. A size change bumps `updated_at`, which
/// re-arms the settle threshold.
pub fn upsert(conn: &Connection, file: &NewFile<'_>, now: &str) -> Result<UpsertOutcome, DatabaseError> {
    match find_by_path(conn, file.location_id, file.path)? {
        Some(existing) if existing.size == file.size => Ok(UpsertOutcome::Unchanged(existing.id)),
        Some(existing) => {
            update_size(conn, existing.id, file.size, now)?;
            Ok(UpsertOutcome::Resized(existing.id))
        }
        None => {
            conn.execute(
                "INSERT INTO files (location_id, experiment_id, path, size, is_bundle, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    file.location_id,
                    file.experiment_id,
                    file.path,
                    file.size,
                    file.is_bundle,
                    now
                ],
            )?;
            Ok(UpsertOutcome::Created(conn.last_insert_rowid()))
        }
    }
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<FileRow>, DatabaseError> {
    Ok(conn
        .query_row("SELECT * FROM files WHERE id = ?1", params![id], FileRow::from_row)
        .optional()?)
}

pub fn find_by_path(
    conn: &Connection,
    location_id: i64,
    path: &str,
) -> Result<Option<FileRow>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM files WHERE location_id = ?1 AND path = ?2",
            params![location_id, path],
            FileRow::from_row,
        )
        .optional()?)
}

/// Records whose path lies strictly under the directory `prefix`.
pub fn list_under(
    conn: &Connection,
    location_id: i64,
    prefix: &str,
) -> Result<Vec<FileRow>, DatabaseError> {
    let pattern = format!("{}/%", escape_like(prefix.trim_end_matches('/')));
    let mut stmt = conn.prepare(
        "SELECT * FROM files WHERE location_id = ?1 AND path LIKE ?2 ESCAPE '\\' ORDER BY path",
    )?;
    let rows = stmt
        .query_map(params![location_id, pattern], FileRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_for_experiment(conn: &Connection, experiment_id: i64) -> Result<Vec<FileRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM files WHERE experiment_id = ?1 ORDER BY path")?;
    let rows = stmt
        .query_map(params![experiment_id], FileRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_for_location(conn: &Connection, location_id: i64) -> Result<Vec<FileRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM files WHERE location_id = ?1 ORDER BY path")?;
    let rows = stmt
        .query_map(params![location_id], FileRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Ready records of an experiment, optionally limited to one location.
pub fn count_ready(
    conn: &Connection,
    experiment_id: i64,
    location_id: Option<i64>,
) -> Result<i64, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM files
         WHERE experiment_id = ?1 AND ready = 1 AND (?2 IS NULL OR location_id = ?2)",
        params![experiment_id, location_id],
        |r| r.get(0),
    )?)
}

/// Records not yet ready whose last change is older than `cutoff`.
pub fn list_settled_candidates(conn: &Connection, cutoff: &str) -> Result<Vec<FileRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM files WHERE ready = 0 AND updated_at < ?1 ORDER BY location_id, path",
    )?;
    let rows = stmt
        .query_map(params![cutoff], FileRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn update_size(conn: &Connection, id: i64, size: i64, now: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE files SET size = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, size, now],
    )?;
    Ok(())
}

pub fn mark_ready(conn: &Connection, id: i64, now: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE files SET ready = 1, updated_at = ?2 WHERE id = ?1",
        params![id, now],
    )?;
    Ok(())
}

/// Marks the record ready only if it still has the size that was measured.
/// Returns false when the record grew, vanished or was already ready.
pub fn mark_ready_at_size(conn: &Connection, id: i64, size: i64, now: &str) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE files SET ready = 1, updated_at = ?2 WHERE id = ?1 AND size = ?3 AND ready = 0",
        params![id, now, size],
    )?;
    Ok(changed == 1)
}

pub fn set_processing(conn: &Connection, ids: &[i64], processing: bool) -> Result<(), DatabaseError> {
    let mut stmt = conn.prepare("UPDATE files SET processing = ?2 WHERE id = ?1")?;
    for id in ids {
        stmt.execute(params![id, processing])?;
    }
    Ok(())
}

/// Moves a record in place, keeping its id, size and readiness.
pub fn relocate(
    conn: &Connection,
    id: i64,
    new_path: &str,
    experiment_id: i64,
    now: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE files SET path = ?2, experiment_id = ?3, updated_at = ?4 WHERE id = ?1",
        params![id, new_path, experiment_id, now],
    )?;
    Ok(())
}

pub fn delete(conn: &Connection, id: i64) -> Result<(), DatabaseError> {
    conn.execute("DELETE FROM files WHERE id = ?1", params![id])?;
    Ok(())
}

/// Deletes the record at `path` and every record under it. Returns the
/// number of rows removed.
pub fn delete_path(conn: &Connection, location_id: i64, path: &str) -> Result<usize, DatabaseError> {
    let pattern = format!("{}/%", escape_like(path.trim_end_matches('/')));
    let removed = conn.execute(
        "DELETE FROM files WHERE location_id = ?1 AND (path = ?2 OR path LIKE ?3 ESCAPE '\\')",
        params![location_id, path, pattern],
    )?;
    Ok(removed)
}

fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{experiment_repo, location_repo, Database};

    fn setup(conn: &Connection) -> (i64, i64) {
        let loc = location_repo::upsert(conn, &location_repo::NewLocation::new("/data")).unwrap();
        let exp = experiment_repo::get_or_create(conn, "ExpA", ".raw").unwrap();
        (loc.id, exp.id)
    }

    fn new_file(location_id: i64, experiment_id: i64, path: &str, size: i64) -> NewFile<'_> {
        NewFile {
            location_id,
            experiment_id,
            path,
            size,
            is_bundle: false,
        }
    }

    #[test]
    fn test_upsert_outcomes() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let (loc, exp) = setup(conn);
            let t0 = "2026-01-01T00:00:00.000Z";
            let t1 = "2026-01-01T00:01:00.000Z";

            let created = upsert(conn, &new_file(loc, exp, "ExpA/run1.raw", 10), t0)?;
            assert!(matches!(created, UpsertOutcome::Created(_)));

            let same = upsert(conn, &new_file(loc, exp, "ExpA/run1.raw", 10), t1)?;
            assert_eq!(same, UpsertOutcome::Unchanged(created.id()));
            assert_eq!(find_by_id(conn, created.id())?.unwrap().updated_at, t0);

            let resized = upsert(conn, &new_file(loc, exp, "ExpA/run1.raw", 20), t1)?;
            assert_eq!(resized, UpsertOutcome::Resized(created.id()));
            let row = find_by_id(conn, created.id())?.unwrap();
            assert_eq!(row.size, 20);
            assert_eq!(row.updated_at, t1);
            assert!(!row.ready);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_settled_candidates_respect_cutoff_and_readiness() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let (loc, exp) = setup(conn);
            let old = upsert(conn, &new_file(loc, exp, "ExpA/old.raw", 1), "2026-01-01T00:00:00.000Z")?;
            upsert(conn, &new_file(loc, exp, "ExpA/new.raw", 1), "2026-01-01T00:10:00.000Z")?;
            let done = upsert(conn, &new_file(loc, exp, "ExpA/done.raw", 1), "2026-01-01T00:00:00.000Z")?;
            mark_ready(conn, done.id(), "2026-01-01T00:00:00.000Z")?;

            let rows = list_settled_candidates(conn, "2026-01-01T00:05:00.000Z")?;
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].id, old.id());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_delete_path_removes_subtree_only() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let (loc, exp) = setup(conn);
            let now = "2026-01-01T00:00:00.000Z";
            upsert(conn, &new_file(loc, exp, "ExpA/run1.raw", 1), now)?;
            upsert(conn, &new_file(loc, exp, "ExpA/sub/run2.raw", 1), now)?;
            upsert(conn, &new_file(loc, exp, "ExpA_2/run3.raw", 1), now)?;

            assert_eq!(list_under(conn, loc, "ExpA")?.len(), 2);
            assert_eq!(delete_path(conn, loc, "ExpA")?, 2);
            assert!(find_by_path(conn, loc, "ExpA_2/run3.raw")?.is_some());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_relocate_keeps_identity() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let (loc, exp) = setup(conn);
            let id = upsert(conn, &new_file(loc, exp, "ExpA/a.raw", 5), "2026-01-01T00:00:00.000Z")?.id();
            mark_ready(conn, id, "2026-01-01T00:00:00.000Z")?;
            relocate(conn, id, "ExpA/b.raw", exp, "2026-01-01T00:01:00.000Z")?;

            let row = find_by_path(conn, loc, "ExpA/b.raw")?.unwrap();
            assert_eq!(row.id, id);
            assert_eq!(row.size, 5);
            assert!(row.ready);
            assert!(find_by_path(conn, loc, "ExpA/a.raw")?.is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_mark_ready_at_size_requires_matching_size() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let (loc, exp) = setup(conn);
            let now = "2026-01-01T00:00:00.000Z";
            let id = upsert(conn, &new_file(loc, exp, "ExpA/a.raw", 10), now)?.id();
            update_size(conn, id, 50, now)?;

            assert!(!mark_ready_at_size(conn, id, 10, now)?);
            assert!(!find_by_id(conn, id)?.unwrap().ready);
            assert!(mark_ready_at_size(conn, id, 50, now)?);
            assert!(!mark_ready_at_size(conn, id, 50, now)?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_count_ready_by_location() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let (loc, exp) = setup(conn);
            let other = location_repo::upsert(conn, &location_repo::NewLocation::new("/mirror"))?.id;
            let now = "2026-01-01T00:00:00.000Z";
            let a = upsert(conn, &new_file(loc, exp, "ExpA/a.raw", 1), now)?.id();
            let b = upsert(conn, &new_file(other, exp, "ExpA/a.raw", 1), now)?.id();
            mark_ready(conn, a, now)?;
            mark_ready(conn, b, now)?;

            assert_eq!(count_ready(conn, exp, None)?, 2);
            assert_eq!(count_ready(conn, exp, Some(loc))?, 1);
            Ok(())
        })
        .unwrap();
    }
}
