//! Run configurations: one per ingested descriptor file.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

#[derive(Debug, Clone)]
pub struct RunConfigRow {
    pub id: i64,
    pub location_id: i64,
    pub experiment_id: i64,
    pub descriptor_path: String,
    /// Parsed descriptor, serialized as JSON.
    pub content: String,
    pub prefix: String,
    pub fasta_required: bool,
    pub fasta_ready: bool,
    pub library_required: bool,
    pub library_ready: bool,
    pub created_at: String,
}

impl RunConfigRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            location_id: row.get("location_id")?,
            experiment_id: row.get("experiment_id")?,
            descriptor_path: row.get("descriptor_path")?,
            content: row.get("content")?,
            prefix: row.get("prefix")?,
            fasta_required: row.get("fasta_required")?,
            fasta_ready: row.get("fasta_ready")?,
            library_required: row.get("library_required")?,
            library_ready: row.get("library_ready")?,
            created_at: row.get("created_at")?,
        })
    }

    /// True when every required reference file has settled.
    pub fn prerequisites_ready(&self) -> bool {
        (!self.fasta_required || self.fasta_ready) && (!self.library_required || self.library_ready)
    }
}

#[derive(Debug, Clone)]
pub struct NewRunConfig<'a> {
    pub location_id: i64,
    pub experiment_id: i64,
    pub descriptor_path: &'a str,
    pub content: &'a str,
    pub prefix: &'a str,
    pub fasta_required: bool,
    pub library_required: bool,
}

pub fn insert(conn: &Connection, config: &NewRunConfig<'_>) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO run_configs (location_id, experiment_id, descriptor_path, content, prefix,
         fasta_required, library_required, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            config.location_id,
            config.experiment_id,
            config.descriptor_path,
            config.content,
            config.prefix,
            config.fasta_required,
            config.library_required,
            super::now()
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<RunConfigRow>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM run_configs WHERE id = ?1",
            params![id],
            RunConfigRow::from_row,
        )
        .optional()?)
}

pub fn find_by_descriptor_path(
    conn: &Connection,
    descriptor_path: &str,
) -> Result<Option<RunConfigRow>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM run_configs WHERE descriptor_path = ?1",
            params![descriptor_path],
            RunConfigRow::from_row,
        )
        .optional()?)
}

pub fn set_reference_readiness(
    conn: &Connection,
    id: i64,
    fasta_ready: bool,
    library_ready: bool,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE run_configs SET fasta_ready = ?2, library_ready = ?3 WHERE id = ?1",
        params![id, fasta_ready, library_ready],
    )?;
    Ok(())
}
