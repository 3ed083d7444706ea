//! Reference databases (FASTA) and spectral libraries a run config needs.

use std::fmt;

use rusqlite::{params, Connection, Row};

use super::DatabaseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Fasta,
    Library,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Fasta => "fasta",
            ReferenceKind::Library => "library",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "fasta" => Some(ReferenceKind::Fasta),
            "library" => Some(ReferenceKind::Library),
            _ => None,
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ReferenceRow {
    pub id: i64,
    pub run_config_id: i64,
    pub kind: ReferenceKind,
    /// Absolute path.
    pub path: String,
    pub size: i64,
    pub ready: bool,
    pub updated_at: String,
}

impl ReferenceRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let kind: String = row.get("kind")?;
        let kind = ReferenceKind::parse(&kind).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("unknown reference kind '{}'", kind).into(),
            )
        })?;
        Ok(Self {
            id: row.get("id")?,
            run_config_id: row.get("run_config_id")?,
            kind,
            path: row.get("path")?,
            size: row.get("size")?,
            ready: row.get("ready")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

pub fn insert(
    conn: &Connection,
    run_config_id: i64,
    kind: ReferenceKind,
    path: &str,
    size: i64,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO reference_files (run_config_id, kind, path, size, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![run_config_id, kind.as_str(), path, size, super::now()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_for_run_config(
    conn: &Connection,
    run_config_id: i64,
) -> Result<Vec<ReferenceRow>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT * FROM reference_files WHERE run_config_id = ?1 ORDER BY kind, path")?;
    let rows = stmt
        .query_map(params![run_config_id], ReferenceRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn mark_ready(conn: &Connection, id: i64) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE reference_files SET ready = 1, updated_at = ?2 WHERE id = ?1",
        params![id, super::now()],
    )?;
    Ok(())
}

pub fn update_size(conn: &Connection, id: i64, size: i64) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE reference_files SET size = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, size, super::now()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{experiment_repo, location_repo, run_config_repo, Database};

    #[test]
    fn test_insert_list_and_ready() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let loc = location_repo::upsert(conn, &location_repo::NewLocation::new("/data"))?;
            let exp = experiment_repo::get_or_create(conn, "ExpA", ".raw")?;
            let rc = run_config_repo::insert(
                conn,
                &run_config_repo::NewRunConfig {
                    location_id: loc.id,
                    experiment_id: exp.id,
                    descriptor_path: "/data/ExpA/a.cat.yml",
                    content: "{}",
                    prefix: "p",
                    fasta_required: true,
                    library_required: true,
                },
            )?;
            insert(conn, rc, ReferenceKind::Fasta, "/data/ExpA/db.fasta", 0)?;
            insert(conn, rc, ReferenceKind::Library, "/data/ExpA/lib.tsv", 7)?;

            let rows = list_for_run_config(conn, rc)?;
            assert_eq!(rows.len(), 2);
            assert_eq!(rows[0].kind, ReferenceKind::Fasta);

            update_size(conn, rows[0].id, 12)?;
            mark_ready(conn, rows[1].id)?;
            let rows = list_for_run_config(conn, rc)?;
            assert_eq!(rows[0].size, 12);
            assert!(!rows[0].ready);
            assert!(rows[1].ready);
            Ok(())
        })
        .unwrap();
    }
}
