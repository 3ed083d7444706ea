//! Per-file result summaries and the detail rows copied from the engine's
//! matrix reports.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

#[derive(Debug, Clone)]
pub struct ResultSummaryRow {
    pub id: i64,
    pub analysis_id: i64,
    pub file_id: i64,
    pub protein_identified: i64,
    pub precursor_identified: i64,
    pub stats_file: Option<String>,
    pub log_file: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ResultSummaryRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            analysis_id: row.get("analysis_id")?,
            file_id: row.get("file_id")?,
            protein_identified: row.get("protein_identified")?,
            precursor_identified: row.get("precursor_identified")?,
            stats_file: row.get("stats_file")?,
            log_file: row.get("log_file")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewSummary<'a> {
    pub analysis_id: i64,
    pub file_id: i64,
    pub protein_identified: i64,
    pub precursor_identified: i64,
    pub stats_file: &'a str,
    pub log_file: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrecursorDetail {
    pub precursor_id: String,
    pub protein_group: String,
    pub gene_names: Option<String>,
    pub proteotypic: bool,
    pub intensity: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProteinGroupDetail {
    pub protein_group: String,
    pub gene_names: Option<String>,
    pub intensity: f64,
}

pub fn find(
    conn: &Connection,
    analysis_id: i64,
    file_id: i64,
) -> Result<Option<ResultSummaryRow>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM result_summaries WHERE analysis_id = ?1 AND file_id = ?2",
            params![analysis_id, file_id],
            ResultSummaryRow::from_row,
        )
        .optional()?)
}

pub fn insert(conn: &Connection, summary: &NewSummary<'_>) -> Result<i64, DatabaseError> {
    let now = super::now();
    conn.execute(
        "INSERT INTO result_summaries (analysis_id, file_id, protein_identified, precursor_identified,
         stats_file, log_file, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            summary.analysis_id,
            summary.file_id,
            summary.protein_identified,
            summary.precursor_identified,
            summary.stats_file,
            summary.log_file,
            now
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_counts(
    conn: &Connection,
    id: i64,
    protein_identified: i64,
    precursor_identified: i64,
    stats_file: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE result_summaries SET protein_identified = ?2, precursor_identified = ?3,
         stats_file = ?4, updated_at = ?5 WHERE id = ?1",
        params![id, protein_identified, precursor_identified, stats_file, super::now()],
    )?;
    Ok(())
}

pub fn list_for_analysis(conn: &Connection, analysis_id: i64) -> Result<Vec<ResultSummaryRow>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT * FROM result_summaries WHERE analysis_id = ?1 ORDER BY file_id")?;
    let rows = stmt
        .query_map(params![analysis_id], ResultSummaryRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Replaces every precursor row of a summary.
pub fn replace_precursors(
    conn: &Connection,
    summary_id: i64,
    file_id: i64,
    rows: &[PrecursorDetail],
) -> Result<(), DatabaseError> {
    conn.execute(
        "DELETE FROM precursor_rows WHERE result_summary_id = ?1",
        params![summary_id],
    )?;
    let mut stmt = conn.prepare(
        "INSERT INTO precursor_rows (result_summary_id, file_id, precursor_id, protein_group,
         gene_names, proteotypic, intensity)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for row in rows {
        stmt.execute(params![
            summary_id,
            file_id,
            row.precursor_id,
            row.protein_group,
            row.gene_names,
            row.proteotypic,
            row.intensity
        ])?;
    }
    Ok(())
}

/// Replaces every protein-group row of a summary.
pub fn replace_protein_groups(
    conn: &Connection,
    summary_id: i64,
    file_id: i64,
    rows: &[ProteinGroupDetail],
) -> Result<(), DatabaseError> {
    conn.execute(
        "DELETE FROM protein_group_rows WHERE result_summary_id = ?1",
        params![summary_id],
    )?;
    let mut stmt = conn.prepare(
        "INSERT INTO protein_group_rows (result_summary_id, file_id, protein_group, gene_names, intensity)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for row in rows {
        stmt.execute(params![
            summary_id,
            file_id,
            row.protein_group,
            row.gene_names,
            row.intensity
        ])?;
    }
    Ok(())
}

pub fn count_precursors(conn: &Connection, summary_id: i64) -> Result<i64, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM precursor_rows WHERE result_summary_id = ?1",
        params![summary_id],
        |r| r.get(0),
    )?)
}

pub fn count_protein_groups(conn: &Connection, summary_id: i64) -> Result<i64, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM protein_group_rows WHERE result_summary_id = ?1",
        params![summary_id],
        |r| r.get(0),
    )?)
}
