//! Task queue rows and their streamed log lines.
//!
//! Status changes are conditional updates (`... WHERE status = ?expected`)
//! so a row only moves if nobody else moved it first; callers check the
//! returned flag.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: i64,
    pub task_id: String,
    pub name: String,
    pub queue_name: String,
    pub status: String,
    pub attempts: i64,
    pub not_before: Option<String>,
    pub analysis_id: i64,
    pub worker_id: Option<i64>,
    /// JSON parameter blob.
    pub params: String,
    pub error: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            task_id: row.get("task_id")?,
            name: row.get("name")?,
            queue_name: row.get("queue_name")?,
            status: row.get("status")?,
            attempts: row.get("attempts")?,
            not_before: row.get("not_before")?,
            analysis_id: row.get("analysis_id")?,
            worker_id: row.get("worker_id")?,
            params: row.get("params")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewTask<'a> {
    pub task_id: &'a str,
    pub name: &'a str,
    pub queue_name: &'a str,
    pub analysis_id: i64,
    pub params: &'a str,
}

/// A persisted stdout/stderr line.
#[derive(Debug, Clone)]
pub struct LogLineRow {
    pub seq: i64,
    pub stream: String,
    pub line: String,
}

/// A running task whose worker has gone quiet.
#[derive(Debug, Clone)]
pub struct StalledTask {
    pub task_id: String,
    pub analysis_id: i64,
    pub started_at: Option<String>,
    pub worker_name: Option<String>,
    pub worker_last_seen: Option<String>,
}

pub fn insert(conn: &Connection, task: &NewTask<'_>) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO tasks (task_id, name, queue_name, status, analysis_id, params, created_at)
         VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?6)",
        params![
            task.task_id,
            task.name,
            task.queue_name,
            task.analysis_id,
            task.params,
            super::now()
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<TaskRow>, DatabaseError> {
    Ok(conn
        .query_row("SELECT * FROM tasks WHERE id = ?1", params![id], TaskRow::from_row)
        .optional()?)
}

pub fn find_by_task_id(conn: &Connection, task_id: &str) -> Result<Option<TaskRow>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM tasks WHERE task_id = ?1",
            params![task_id],
            TaskRow::from_row,
        )
        .optional()?)
}

pub fn list_for_analysis(conn: &Connection, analysis_id: i64) -> Result<Vec<TaskRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM tasks WHERE analysis_id = ?1 ORDER BY id")?;
    let rows = stmt
        .query_map(params![analysis_id], TaskRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Oldest task a worker serving `queues` may take at `now`.
///
/// Pending tasks and retries whose backoff has elapsed qualify. A queue
/// list containing `*` matches every queue.
pub fn next_claimable(
    conn: &Connection,
    queues: &[String],
    now: &str,
) -> Result<Option<TaskRow>, DatabaseError> {
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(now.to_string())];
    let mut sql = String::from(
        "SELECT * FROM tasks
         WHERE (status = 'pending' OR (status = 'retry' AND (not_before IS NULL OR not_before <= ?1)))",
    );

    if !queues.iter().any(|q| q == "*") {
        let placeholders: Vec<String> = queues
            .iter()
            .map(|q| {
                param_values.push(Box::new(q.clone()));
                format!("?{}", param_values.len())
            })
            .collect();
        if placeholders.is_empty() {
            return Ok(None);
        }
        sql.push_str(&format!(" AND queue_name IN ({})", placeholders.join(", ")));
    }
    sql.push_str(" ORDER BY created_at, id LIMIT 1");

    let params_ref: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    Ok(conn
        .query_row(&sql, params_ref.as_slice(), TaskRow::from_row)
        .optional()?)
}

/// Moves a task from `expected` to `running` for `worker_id`. Returns false
/// if the task was no longer in `expected`.
pub fn claim(
    conn: &Connection,
    id: i64,
    expected: &str,
    worker_id: i64,
    now: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE tasks SET status = 'running', worker_id = ?3, attempts = attempts + 1,
         started_at = ?4, finished_at = NULL, error = NULL
         WHERE id = ?1 AND status = ?2",
        params![id, expected, worker_id, now],
    )?;
    Ok(changed == 1)
}

/// Terminal transition out of `running`.
pub fn finish(
    conn: &Connection,
    id: i64,
    status: &str,
    error: Option<&str>,
    now: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE tasks SET status = ?2, error = ?3, finished_at = ?4
         WHERE id = ?1 AND status = 'running'",
        params![id, status, error, now],
    )?;
    Ok(changed == 1)
}

/// `running` to `retry`, not claimable again before `not_before`.
pub fn schedule_retry(
    conn: &Connection,
    id: i64,
    not_before: &str,
    error: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE tasks SET status = 'retry', not_before = ?2, error = ?3, worker_id = NULL
         WHERE id = ?1 AND status = 'running'",
        params![id, not_before, error],
    )?;
    Ok(changed == 1)
}

/// Appends one output line; returns its sequence number.
pub fn append_log_line(
    conn: &Connection,
    task_row_id: i64,
    stream: &str,
    line: &str,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO task_log_lines (task_id, seq, stream, line)
         SELECT ?1, COALESCE(MAX(seq), 0) + 1, ?2, ?3 FROM task_log_lines WHERE task_id = ?1",
        params![task_row_id, stream, line],
    )?;
    Ok(conn.query_row(
        "SELECT seq FROM task_log_lines WHERE id = ?1",
        params![conn.last_insert_rowid()],
        |r| r.get(0),
    )?)
}

pub fn log_lines(conn: &Connection, task_row_id: i64) -> Result<Vec<LogLineRow>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT seq, stream, line FROM task_log_lines WHERE task_id = ?1 ORDER BY seq")?;
    let rows = stmt
        .query_map(params![task_row_id], |r| {
            Ok(LogLineRow {
                seq: r.get(0)?,
                stream: r.get(1)?,
                line: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Running tasks started before `cutoff` whose worker was last seen before
/// `cutoff` (or never).
pub fn list_stalled(conn: &Connection, cutoff: &str) -> Result<Vec<StalledTask>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT t.task_id, t.analysis_id, t.started_at, w.name, w.last_seen
         FROM tasks t LEFT JOIN workers w ON w.id = t.worker_id
         WHERE t.status = 'running'
           AND (t.started_at IS NULL OR t.started_at < ?1)
           AND (w.last_seen IS NULL OR w.last_seen < ?1)
         ORDER BY t.started_at",
    )?;
    let rows = stmt
        .query_map(params![cutoff], |r| {
            Ok(StalledTask {
                task_id: r.get(0)?,
                analysis_id: r.get(1)?,
                started_at: r.get(2)?,
                worker_name: r.get(3)?,
                worker_last_seen: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// (status, count) pairs for one analysis.
pub fn status_counts(conn: &Connection, analysis_id: i64) -> Result<Vec<(String, i64)>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT status, COUNT(*) FROM tasks WHERE analysis_id = ?1 GROUP BY status ORDER BY status",
    )?;
    let rows = stmt
        .query_map(params![analysis_id], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
