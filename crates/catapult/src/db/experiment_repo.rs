//! Experiments: one per instrument-output folder.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

#[derive(Debug, Clone)]
pub struct ExperimentRow {
    pub id: i64,
    pub name: String,
    pub vendor: String,
    pub sample_count: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

impl ExperimentRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            vendor: row.get("vendor")?,
            sample_count: row.get("sample_count")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Returns the experiment with `name`, creating it with `vendor` if absent.
/// An existing experiment keeps its original vendor tag.
pub fn get_or_create(
    conn: &Connection,
    name: &str,
    vendor: &str,
) -> Result<ExperimentRow, DatabaseError> {
    let now = super::now();
    conn.execute(
        "INSERT INTO experiments (name, vendor, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)
         ON CONFLICT(name) DO NOTHING",
        params![name, vendor, now],
    )?;
    find_by_name(conn, name)?.ok_or_else(|| DatabaseError::NotFound {
        entity: "experiment",
        id: name.to_string(),
    })
}

pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<ExperimentRow>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM experiments WHERE name = ?1",
            params![name],
            ExperimentRow::from_row,
        )
        .optional()?)
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<ExperimentRow>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM experiments WHERE id = ?1",
            params![id],
            ExperimentRow::from_row,
        )
        .optional()?)
}

pub fn set_sample_count(conn: &Connection, id: i64, count: i64) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE experiments SET sample_count = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, count, super::now()],
    )?;
    Ok(())
}
