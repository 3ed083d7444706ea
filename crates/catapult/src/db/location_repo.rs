//! Watch-location registry: the `watch_locations` table.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

pub const DEFAULT_IGNORE_TERM: &str = "DONOTPROCESS";
pub const DEFAULT_EXTENSIONS: &str = ".raw,.wiff,.d,.mzML,.dia";

/// A registered watch location.
#[derive(Debug, Clone)]
pub struct LocationRow {
    pub id: i64,
    pub root_path: String,
    pub ignore_term: String,
    pub extensions: String,
    pub network: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl LocationRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            root_path: row.get("root_path")?,
            ignore_term: row.get("ignore_term")?,
            extensions: row.get("extensions")?,
            network: row.get("network")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    pub fn root(&self) -> &Path {
        Path::new(&self.root_path)
    }

    /// Recognized extensions, each with a leading dot.
    pub fn extension_list(&self) -> Vec<String> {
        parse_extensions(&self.extensions)
    }

    pub fn absolute(&self, relative: &str) -> PathBuf {
        self.root().join(relative)
    }
}

/// Splits a comma-separated extension list, normalizing the leading dot.
pub fn parse_extensions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(|e| {
            if e.starts_with('.') {
                e.to_string()
            } else {
                format!(".{}", e)
            }
        })
        .collect()
}

/// Values for registering a location.
#[derive(Debug, Clone)]
pub struct NewLocation {
    pub root_path: String,
    pub ignore_term: String,
    pub extensions: String,
    pub network: bool,
}

impl NewLocation {
    pub fn new(root_path: impl Into<String>) -> Self {
        Self {
            root_path: root_path.into(),
            ignore_term: DEFAULT_IGNORE_TERM.to_string(),
            extensions: DEFAULT_EXTENSIONS.to_string(),
            network: false,
        }
    }
}

pub fn insert(conn: &Connection, location: &NewLocation) -> Result<i64, DatabaseError> {
    let now = super::now();
    conn.execute(
        "INSERT INTO watch_locations (root_path, ignore_term, extensions, network, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![
            location.root_path,
            location.ignore_term,
            location.extensions,
            location.network,
            now
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Registers a location, or updates the editable fields (ignore-term and
/// extensions) of an existing one. The network flag is fixed at creation.
pub fn upsert(conn: &Connection, location: &NewLocation) -> Result<LocationRow, DatabaseError> {
    match find_by_root(conn, &location.root_path)? {
        Some(existing) => {
            update_filters(
                conn,
                existing.id,
                &location.ignore_term,
                &location.extensions,
            )?;
            find_by_id(conn, existing.id)?.ok_or_else(|| DatabaseError::NotFound {
                entity: "watch location",
                id: existing.id.to_string(),
            })
        }
        None => {
            let id = insert(conn, location)?;
            find_by_id(conn, id)?.ok_or_else(|| DatabaseError::NotFound {
                entity: "watch location",
                id: id.to_string(),
            })
        }
    }
}

pub fn update_filters(
    conn: &Connection,
    id: i64,
    ignore_term: &str,
    extensions: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE watch_locations SET ignore_term = ?2, extensions = ?3, updated_at = ?4 WHERE id = ?1",
        params![id, ignore_term, extensions, super::now()],
    )?;
    Ok(())
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<LocationRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM watch_locations WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id], LocationRow::from_row)?;
    match rows.next() {
        Some(Ok(row)) => Ok(Some(row)),
        Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
        None => Ok(None),
    }
}

pub fn find_by_root(conn: &Connection, root_path: &str) -> Result<Option<LocationRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM watch_locations WHERE root_path = ?1",
            params![root_path],
            LocationRow::from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn list(conn: &Connection) -> Result<Vec<LocationRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM watch_locations ORDER BY id")?;
    let rows = stmt
        .query_map([], LocationRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn test_insert_uses_defaults() {
        let db = Database::open_in_memory().unwrap();
        let row = db
            .with_conn(|conn| upsert(conn, &NewLocation::new("/data")))
            .unwrap();
        assert_eq!(row.ignore_term, "DONOTPROCESS");
        assert_eq!(
            row.extension_list(),
            vec![".raw", ".wiff", ".d", ".mzML", ".dia"]
        );
        assert!(!row.network);
    }

    #[test]
    fn test_upsert_updates_only_editable_fields() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let first = upsert(conn, &NewLocation::new("/data"))?;
            let mut changed = NewLocation::new("/data");
            changed.ignore_term = "SKIP".to_string();
            changed.extensions = "raw, .d".to_string();
            changed.network = true;
            let second = upsert(conn, &changed)?;

            assert_eq!(first.id, second.id);
            assert_eq!(second.ignore_term, "SKIP");
            assert_eq!(second.extension_list(), vec![".raw", ".d"]);
            assert!(!second.network);
            assert_eq!(list(conn)?.len(), 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_find_missing() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            assert!(find_by_id(conn, 42)?.is_none());
            assert!(find_by_root(conn, "/nowhere")?.is_none());
            Ok(())
        })
        .unwrap();
    }
}
