//! Analysis jobs and their claimed/completed file relations.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

#[derive(Debug, Clone)]
pub struct AnalysisRow {
    pub id: i64,
    pub name: String,
    pub experiment_id: i64,
    pub run_config_id: Option<i64>,
    pub job_type: String,
    pub total_files: Option<i64>,
    pub processing: bool,
    pub completed: bool,
    pub keep_details: bool,
    pub start_time: Option<String>,
    pub stop_time: Option<String>,
    pub commands: Option<String>,
    pub output_folder: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl AnalysisRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            experiment_id: row.get("experiment_id")?,
            run_config_id: row.get("run_config_id")?,
            job_type: row.get("job_type")?,
            total_files: row.get("total_files")?,
            processing: row.get("processing")?,
            completed: row.get("completed")?,
            keep_details: row.get("keep_details")?,
            start_time: row.get("start_time")?,
            stop_time: row.get("stop_time")?,
            commands: row.get("commands")?,
            output_folder: row.get("output_folder")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewAnalysis<'a> {
    pub name: &'a str,
    pub experiment_id: i64,
    pub run_config_id: Option<i64>,
    pub job_type: &'a str,
    pub total_files: Option<i64>,
    pub keep_details: bool,
}

pub fn insert(conn: &Connection, analysis: &NewAnalysis<'_>) -> Result<i64, DatabaseError> {
    let now = super::now();
    conn.execute(
        "INSERT INTO analyses (name, experiment_id, run_config_id, job_type, total_files, keep_details,
         created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            analysis.name,
            analysis.experiment_id,
            analysis.run_config_id,
            analysis.job_type,
            analysis.total_files,
            analysis.keep_details,
            now
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<AnalysisRow>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM analyses WHERE id = ?1",
            params![id],
            AnalysisRow::from_row,
        )
        .optional()?)
}

pub fn find_by_run_config(conn: &Connection, run_config_id: i64) -> Result<Option<AnalysisRow>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM analyses WHERE run_config_id = ?1 ORDER BY id LIMIT 1",
            params![run_config_id],
            AnalysisRow::from_row,
        )
        .optional()?)
}

pub fn list(conn: &Connection) -> Result<Vec<AnalysisRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM analyses ORDER BY id")?;
    let rows = stmt
        .query_map([], AnalysisRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Jobs at rest (neither processing nor completed) that have a run config.
pub fn list_at_rest(conn: &Connection) -> Result<Vec<AnalysisRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM analyses
         WHERE processing = 0 AND completed = 0 AND run_config_id IS NOT NULL
         ORDER BY id",
    )?;
    let rows = stmt
        .query_map([], AnalysisRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Moves a job into processing with its resolved command. `start_time` is
/// set on the first run only.
pub fn mark_processing(
    conn: &Connection,
    id: i64,
    job_type: &str,
    commands: &str,
    output_folder: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE analyses SET processing = 1, job_type = ?2, commands = ?3, output_folder = ?4,
         start_time = COALESCE(start_time, ?5), updated_at = ?5
         WHERE id = ?1 AND processing = 0 AND completed = 0",
        params![id, job_type, commands, output_folder, super::now()],
    )?;
    Ok(changed == 1)
}

pub fn clear_processing(conn: &Connection, id: i64) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE analyses SET processing = 0, updated_at = ?2 WHERE id = ?1",
        params![id, super::now()],
    )?;
    Ok(())
}

pub fn mark_completed(conn: &Connection, id: i64) -> Result<(), DatabaseError> {
    let now = super::now();
    conn.execute(
        "UPDATE analyses SET processing = 0, completed = 1, stop_time = ?2, updated_at = ?2 WHERE id = ?1",
        params![id, now],
    )?;
    Ok(())
}

/// Records that `task_id` (the task row id) is working on `file_ids`.
pub fn claim_files(
    conn: &Connection,
    analysis_id: i64,
    task_id: i64,
    file_ids: &[i64],
) -> Result<(), DatabaseError> {
    let mut stmt = conn.prepare(
        "INSERT INTO analysis_claimed_files (analysis_id, file_id, task_id) VALUES (?1, ?2, ?3)",
    )?;
    for file_id in file_ids {
        stmt.execute(params![analysis_id, file_id, task_id])?;
    }
    Ok(())
}

/// Drops every claim held by a task and returns the released file ids.
pub fn release_claims(conn: &Connection, task_id: i64) -> Result<Vec<i64>, DatabaseError> {
    let released: Vec<i64> = {
        let mut stmt = conn.prepare("SELECT file_id FROM analysis_claimed_files WHERE task_id = ?1 ORDER BY file_id")?;
        let ids = stmt
            .query_map(params![task_id], |r| r.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        ids
    };
    conn.execute(
        "DELETE FROM analysis_claimed_files WHERE task_id = ?1",
        params![task_id],
    )?;
    Ok(released)
}

pub fn complete_files(
    conn: &Connection,
    analysis_id: i64,
    task_id: i64,
    file_ids: &[i64],
) -> Result<(), DatabaseError> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO analysis_completed_files (analysis_id, file_id, task_id) VALUES (?1, ?2, ?3)",
    )?;
    for file_id in file_ids {
        stmt.execute(params![analysis_id, file_id, task_id])?;
    }
    Ok(())
}

pub fn claimed_file_ids(conn: &Connection, analysis_id: i64) -> Result<Vec<i64>, DatabaseError> {
    file_ids(conn, "analysis_claimed_files", analysis_id)
}

pub fn completed_file_ids(conn: &Connection, analysis_id: i64) -> Result<Vec<i64>, DatabaseError> {
    file_ids(conn, "analysis_completed_files", analysis_id)
}

fn file_ids(conn: &Connection, table: &str, analysis_id: i64) -> Result<Vec<i64>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT file_id FROM {} WHERE analysis_id = ?1 ORDER BY file_id",
        table
    ))?;
    let ids = stmt
        .query_map(params![analysis_id], |r| r.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Claimed files that have no completed counterpart.
pub fn count_outstanding_claims(conn: &Connection, analysis_id: i64) -> Result<i64, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM analysis_claimed_files c
         WHERE c.analysis_id = ?1
           AND NOT EXISTS (SELECT 1 FROM analysis_completed_files d
                           WHERE d.analysis_id = c.analysis_id AND d.file_id = c.file_id)",
        params![analysis_id],
        |r| r.get(0),
    )?)
}
