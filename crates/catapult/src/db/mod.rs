//! Catalog: the SQLite store shared by the sentinel, the checker and every
//! worker process.
//!
//! Each process holds one `Database` handle wrapping a single rusqlite
//! connection behind a `Mutex`. Cross-process writers are serialized by
//! SQLite itself; the busy timeout makes a contending process wait for the
//! write lock instead of failing with `SQLITE_BUSY`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, TransactionBehavior};

pub mod analysis_repo;
pub mod error;
pub mod experiment_repo;
pub mod file_repo;
pub mod location_repo;
pub mod migrations;
pub mod reference_repo;
pub mod result_repo;
pub mod run_config_repo;
pub mod task_repo;
pub mod worker_repo;

pub use error::DatabaseError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Thread-safe catalog handle wrapping a single rusqlite connection.
///
/// Cloning is cheap (inner `Arc`). Repository functions take a plain
/// `&Connection` so they can run either through [`Database::with_conn`] or
/// inside a [`Database::transaction`].
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) the catalog at the given path and runs all
    /// pending migrations.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&conn)?;

        log::info!("Catalog opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory catalog for testing. Runs all migrations.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Provides locked access to the underlying connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }

    /// Runs `f` inside a `BEGIN IMMEDIATE` transaction.
    ///
    /// The write lock is taken up front, so two processes cannot both read
    /// the same row and then race to update it. Commits when `f` returns
    /// `Ok`, rolls back otherwise.
    pub fn transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: From<DatabaseError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| E::from(DatabaseError::LockPoisoned))?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| E::from(DatabaseError::Sqlite(e)))?;
        let value = f(&tx)?;
        tx.commit().map_err(|e| E::from(DatabaseError::Sqlite(e)))?;
        Ok(value)
    }
}

/// Returns the canonical catalog path: `~/.catapult/data/catapult.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".catapult").join("data").join("catapult.db"))
}

/// Formats a timestamp the way every TEXT timestamp column stores it.
///
/// Fixed-width millisecond RFC 3339 in UTC, so lexical comparison in SQL
/// matches chronological order.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time in the stored timestamp format.
pub fn now() -> String {
    timestamp(Utc::now())
}

/// Parses a stored timestamp back into a `DateTime<Utc>`.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let count: u32 =
                conn.query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))?;
            assert!(count > 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_open_file_db_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("catalog.db");
        let db = Database::open(&path).unwrap();
        db.with_conn(|conn| {
            let mode: String = conn.query_row("PRAGMA journal_mode", [], |r| r.get(0))?;
            assert_eq!(mode.to_lowercase(), "wal");
            Ok(())
        })
        .unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_default_database_path() {
        let path = default_database_path().unwrap();
        assert!(path.ends_with("catapult.db"));
        assert!(path.to_string_lossy().contains(".catapult"));
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let result: Result<(), DatabaseError> = db.transaction(|conn| {
            location_repo::insert(conn, &location_repo::NewLocation::new("/data"))?;
            Err(DatabaseError::NotFound {
                entity: "test",
                id: "x".to_string(),
            })
        });
        assert!(result.is_err());
        let count = db.with_conn(|conn| location_repo::list(conn)).unwrap().len();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_transaction_commits() {
        let db = Database::open_in_memory().unwrap();
        let clone = db.clone();
        db.transaction::<_, _, DatabaseError>(|conn| {
            location_repo::insert(conn, &location_repo::NewLocation::new("/data"))
        })
        .unwrap();
        let rows = clone.with_conn(|conn| location_repo::list(conn)).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_timestamps_sort_lexically() {
        let earlier = timestamp(Utc::now() - chrono::Duration::seconds(5));
        let later = now();
        assert!(earlier < later);
        assert_eq!(parse_timestamp(&later).map(timestamp), Some(later));
    }
}
