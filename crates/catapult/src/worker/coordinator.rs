//! Catalog side of a worker: registration, heartbeats, the at-most-one task
//! claim and the bookkeeping that follows each run.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::identity::{SystemInfo, WorkerIdentity};
use crate::db::location_repo::{self, LocationRow};
use crate::db::{self, analysis_repo, file_repo, task_repo, worker_repo, Database, DatabaseError};
use crate::error::{JobError, WorkerError};
use crate::jobs::{evaluate_completion, status_after_failure, CompletionCheck, TaskParams, TaskStatus};

pub const STATUS_ONLINE: &str = "online";
pub const STATUS_OFFLINE: &str = "offline";
pub const STATUS_ERROR: &str = "error";

/// A task this worker now owns.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub row_id: i64,
    pub task_id: String,
    pub analysis_id: i64,
    /// Attempts including the current one.
    pub attempts: u32,
    pub params: TaskParams,
}

#[derive(Debug)]
pub enum Claim {
    Task(ClaimedTask),
    /// Claimed but unusable (malformed parameters); already marked failed.
    Rejected { task_id: String, analysis_id: i64, reason: String },
    Idle,
}

#[derive(Clone)]
pub struct Coordinator {
    db: Database,
    worker_id: i64,
    queues: Vec<String>,
}

impl Coordinator {
    /// Registers (or refreshes) the worker row and marks it online.
    pub fn register(db: Database, identity: &WorkerIdentity, queues: Vec<String>) -> Result<Self, WorkerError> {
        let system_info = SystemInfo::collect().to_json();
        let params = serde_json::json!({ "queues": queues }).to_string();
        let row = db
            .with_conn(|conn| {
                worker_repo::upsert(
                    conn,
                    &identity.name,
                    &identity.hostname,
                    STATUS_ONLINE,
                    Some(&system_info),
                    Some(&params),
                )
            })
            .map_err(|e| match e {
                DatabaseError::Sqlite(inner) => WorkerError::Registration(format!(
                    "'{}' on '{}': {}",
                    identity.name, identity.hostname, inner
                )),
                other => WorkerError::Database(other),
            })?;

        info!(
            "Worker '{}' registered on '{}' (id {}), queues: {}",
            row.name,
            row.hostname,
            row.id,
            queues.join(", ")
        );
        Ok(Self {
            db,
            worker_id: row.id,
            queues,
        })
    }

    pub fn worker_id(&self) -> i64 {
        self.worker_id
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn heartbeat(&self) -> Result<(), WorkerError> {
        self.db
            .with_conn(|conn| worker_repo::touch(conn, self.worker_id, &db::now()))?;
        Ok(())
    }

    /// Updates the worker's status along with a fresh system snapshot.
    pub fn set_status(&self, status: &str) -> Result<(), WorkerError> {
        let info = SystemInfo::collect().to_json();
        self.db
            .with_conn(|conn| worker_repo::set_status(conn, self.worker_id, status, Some(&info)))?;
        Ok(())
    }

    pub fn location(&self, id: i64) -> Result<Option<LocationRow>, WorkerError> {
        Ok(self.db.with_conn(|conn| location_repo::find_by_id(conn, id))?)
    }

    /// Takes the oldest claimable task on this worker's queues.
    ///
    /// Selection, the conditional status change and the file claims share
    /// one immediate transaction, so concurrent workers on the same catalog
    /// never both win the same task.
    pub fn claim_next(&self, now: DateTime<Utc>) -> Result<Claim, WorkerError> {
        let stamp = db::timestamp(now);
        self.db.transaction(|conn| -> Result<Claim, WorkerError> {
            worker_repo::touch(conn, self.worker_id, &stamp)?;
            let Some(row) = task_repo::next_claimable(conn, &self.queues, &stamp)? else {
                return Ok(Claim::Idle);
            };
            let current: TaskStatus = row.status.parse()?;
            current.transition(TaskStatus::Running)?;

            if !task_repo::claim(conn, row.id, current.as_str(), self.worker_id, &stamp)? {
                debug!("Task {} was taken by another worker", row.task_id);
                return Ok(Claim::Idle);
            }

            let params = match TaskParams::from_json(&row.params) {
                Ok(params) => params,
                Err(e) => {
                    let reason = format!("Malformed task parameters: {}", e);
                    task_repo::finish(conn, row.id, TaskStatus::Failure.as_str(), Some(&reason), &stamp)?;
                    analysis_repo::clear_processing(conn, row.analysis_id)?;
                    return Ok(Claim::Rejected {
                        task_id: row.task_id,
                        analysis_id: row.analysis_id,
                        reason,
                    });
                }
            };

            analysis_repo::claim_files(conn, row.analysis_id, row.id, &params.file_ids)?;
            file_repo::set_processing(conn, &params.file_ids, true)?;

            Ok(Claim::Task(ClaimedTask {
                row_id: row.id,
                task_id: row.task_id,
                analysis_id: row.analysis_id,
                attempts: (row.attempts + 1).max(1) as u32,
                params,
            }))
        })
    }

    /// Marks the task successful, moves its files from claimed to completed
    /// and evaluates the analysis for completion.
    ///
    /// An analysis that is not yet complete returns to rest so the scheduler
    /// picks up the remaining files.
    pub fn record_success(&self, task: &ClaimedTask) -> Result<CompletionCheck, WorkerError> {
        TaskStatus::Running.transition(TaskStatus::Success)?;
        let stamp = db::now();
        self.db.transaction(|conn| -> Result<(), WorkerError> {
            analysis_repo::complete_files(conn, task.analysis_id, task.row_id, &task.params.file_ids)?;
            analysis_repo::release_claims(conn, task.row_id)?;
            file_repo::set_processing(conn, &task.params.file_ids, false)?;
            task_repo::finish(conn, task.row_id, TaskStatus::Success.as_str(), None, &stamp)?;
            Ok(())
        })?;

        let check = self
            .db
            .with_conn(|conn| Ok(evaluate_completion(conn, task.analysis_id)))?;
        match check {
            Ok(CompletionCheck::Pending { completed, target }) => {
                debug!(
                    "Analysis {} at {}/{} file(s); returning to rest",
                    task.analysis_id, completed, target
                );
                self.db
                    .with_conn(|conn| analysis_repo::clear_processing(conn, task.analysis_id))?;
                Ok(CompletionCheck::Pending { completed, target })
            }
            Ok(other) => Ok(other),
            Err(e @ JobError::ClaimedFilesOutstanding { .. }) => {
                self.db
                    .with_conn(|conn| analysis_repo::clear_processing(conn, task.analysis_id))?;
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Applies the retry policy to a failed run and returns the task's new
    /// status. A retried task keeps its analysis in processing; a failed
    /// one returns the analysis to rest.
    pub fn record_failure(
        &self,
        task: &ClaimedTask,
        reason: &str,
        retryable: bool,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Result<TaskStatus, WorkerError> {
        let next = TaskStatus::Running.transition(status_after_failure(task.attempts, max_retries, retryable))?;
        let now = Utc::now();
        let stamp = db::timestamp(now);
        let not_before = db::timestamp(now + chrono::Duration::seconds(retry_delay.as_secs() as i64));

        self.db.transaction(|conn| -> Result<(), WorkerError> {
            analysis_repo::release_claims(conn, task.row_id)?;
            file_repo::set_processing(conn, &task.params.file_ids, false)?;
            match next {
                TaskStatus::Retry => {
                    task_repo::schedule_retry(conn, task.row_id, &not_before, reason)?;
                }
                _ => {
                    task_repo::finish(conn, task.row_id, TaskStatus::Failure.as_str(), Some(reason), &stamp)?;
                    analysis_repo::clear_processing(conn, task.analysis_id)?;
                }
            }
            Ok(())
        })?;

        match next {
            TaskStatus::Retry => warn!(
                "Task {} will be retried after {} (attempt {} of {}): {}",
                task.task_id, not_before, task.attempts, max_retries, reason
            ),
            _ => warn!("Task {} failed: {}", task.task_id, reason),
        }
        Ok(next)
    }
}
