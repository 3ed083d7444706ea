//! The worker loop: poll, claim, execute, ingest, record.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use super::coordinator::{Claim, ClaimedTask, Coordinator, STATUS_ERROR, STATUS_OFFLINE};
use crate::broadcast::{LogBroadcaster, TaskEvent, TaskEventBroadcaster, TaskEventKind};
use crate::config::WorkerSettings;
use crate::error::{ExecutionError, JobError, WorkerError};
use crate::execution::{execute, ExecutionOutcome, TaskLogSink};
use crate::ingest::{ingest_results, IngestRequest};
use crate::jobs::{CompletionCheck, TaskStatus};

const MAX_JITTER_MS: u64 = 1000;

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub interval: Duration,
    pub heartbeat: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Exit on the first poll that finds nothing to do.
    pub batch: bool,
    pub startup_jitter: bool,
}

impl RunnerOptions {
    pub fn from_settings(settings: &WorkerSettings) -> Self {
        Self {
            interval: Duration::from_millis(settings.interval_ms.max(1)),
            heartbeat: Duration::from_secs(settings.heartbeat_secs.max(1)),
            max_retries: settings.max_retries,
            retry_delay: Duration::from_secs(settings.retry_delay_secs),
            batch: false,
            startup_jitter: true,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub retried: usize,
}

impl RunSummary {
    fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Success => self.succeeded += 1,
            TaskStatus::Retry => self.retried += 1,
            _ => self.failed += 1,
        }
    }
}

pub struct WorkerRunner {
    coordinator: Coordinator,
    options: RunnerOptions,
    logs: LogBroadcaster,
    events: TaskEventBroadcaster,
    cancel: CancellationToken,
}

impl WorkerRunner {
    pub fn new(
        coordinator: Coordinator,
        options: RunnerOptions,
        logs: LogBroadcaster,
        events: TaskEventBroadcaster,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            coordinator,
            options,
            logs,
            events,
            cancel,
        }
    }

    /// Runs until cancelled (or, in batch mode, until the queue is empty).
    /// The worker row is left `offline` on a clean exit and `error` on a
    /// fatal one.
    pub async fn run(&self) -> Result<RunSummary, WorkerError> {
        if self.options.startup_jitter {
            let jitter = rand::thread_rng().gen_range(0..MAX_JITTER_MS);
            tokio::time::sleep(Duration::from_millis(jitter)).await;
        }

        let heartbeat = self.spawn_heartbeat();
        let result = self.poll_loop().await;
        heartbeat.abort();

        let status = if result.is_ok() { STATUS_OFFLINE } else { STATUS_ERROR };
        if let Err(e) = self.coordinator.set_status(status) {
            warn!("Could not mark worker {}: {}", status, e);
        }
        if let Err(e) = &result {
            error!("Worker stopped: {}", e);
        }
        result
    }

    async fn poll_loop(&self) -> Result<RunSummary, WorkerError> {
        let mut summary = RunSummary::default();
        while !self.cancel.is_cancelled() {
            match self.poll_once().await {
                Ok(Some(status)) => summary.record(status),
                Ok(None) if self.options.batch => {
                    info!("Queue empty; batch run finished");
                    break;
                }
                Ok(None) => self.idle().await,
                Err(e) if e.is_transient() => {
                    warn!("Poll failed, backing off: {}", e);
                    self.back_off().await;
                }
                Err(e) => return Err(e),
            }
        }
        info!(
            "Worker exiting: {} succeeded, {} failed, {} retried",
            summary.succeeded, summary.failed, summary.retried
        );
        Ok(summary)
    }

    /// Claims and processes at most one task. `None` when nothing was
    /// claimable.
    pub async fn poll_once(&self) -> Result<Option<TaskStatus>, WorkerError> {
        let claim = self.blocking(|c| c.claim_next(Utc::now())).await?;
        match claim {
            Claim::Idle => Ok(None),
            Claim::Rejected {
                task_id,
                analysis_id,
                reason,
            } => {
                error!("Task {} rejected: {}", task_id, reason);
                self.events
                    .send(TaskEvent::task(TaskEventKind::Failure, &task_id, analysis_id, reason));
                Ok(Some(TaskStatus::Failure))
            }
            Claim::Task(task) => {
                let span = info_span!("task", task_id = %task.task_id, analysis_id = task.analysis_id);
                self.process(task).instrument(span).await.map(Some)
            }
        }
    }

    async fn process(&self, task: ClaimedTask) -> Result<TaskStatus, WorkerError> {
        info!(
            "Running task {} (attempt {}, {} file(s))",
            task.task_id,
            task.attempts,
            task.params.file_ids.len()
        );
        self.emit(&task, TaskEventKind::Running, format!("attempt {}", task.attempts));

        let sink = TaskLogSink::spawn(
            self.coordinator.database().clone(),
            task.row_id,
            task.task_id.clone(),
            self.logs.clone(),
        );
        let outcome = execute(&task.params.argv, &sink, &self.cancel).await;
        sink.finish().await;

        match outcome {
            Ok(ExecutionOutcome::Succeeded) => self.finish_success(task).await,
            Ok(ExecutionOutcome::Failed { code }) => {
                let reason = match code {
                    Some(code) => format!("Engine exited with code {}", code),
                    None => "Engine terminated by signal".to_string(),
                };
                self.finish_failure(task, reason, false).await
            }
            Ok(ExecutionOutcome::Cancelled) => self.finish_failure(task, "Cancelled".to_string(), false).await,
            Err(e @ ExecutionError::Spawn { .. }) => self.finish_failure(task, e.to_string(), true).await,
            Err(e) => self.finish_failure(task, e.to_string(), false).await,
        }
    }

    async fn finish_success(&self, task: ClaimedTask) -> Result<TaskStatus, WorkerError> {
        if let Err(e) = self.ingest(&task).await {
            return self
                .finish_failure(task, format!("Result ingestion failed: {}", e), false)
                .await;
        }

        let outcome = {
            let task = task.clone();
            self.blocking(move |c| c.record_success(&task)).await
        };
        match outcome {
            Ok(CompletionCheck::Completed) => {
                info!("Analysis {} completed", task.analysis_id);
            }
            Ok(_) => {}
            Err(WorkerError::Job(e @ JobError::ClaimedFilesOutstanding { .. })) => {
                error!("{}", e);
                self.events
                    .send(TaskEvent::alert(Some(task.analysis_id), e.to_string()));
            }
            Err(e) => return Err(e),
        }

        self.emit(&task, TaskEventKind::Success, "completed");
        Ok(TaskStatus::Success)
    }

    async fn ingest(&self, task: &ClaimedTask) -> Result<(), WorkerError> {
        let params = task.params.clone();
        let analysis_id = task.analysis_id;
        let task_id = task.task_id.clone();
        let report = self
            .blocking(move |c| {
                let location = c.location(params.location_id)?.ok_or_else(|| WorkerError::Params {
                    task_id,
                    reason: format!("unknown location {}", params.location_id),
                })?;
                Ok(ingest_results(
                    c.database(),
                    &IngestRequest {
                        analysis_id,
                        location: &location,
                        report_path: Path::new(&params.report_path),
                        keep_details: params.keep_details,
                    },
                )?)
            })
            .await?;

        info!(
            "Ingested results for {} file(s), {} row(s) skipped",
            report.file_ids.len(),
            report.skipped
        );
        Ok(())
    }

    async fn finish_failure(
        &self,
        task: ClaimedTask,
        reason: String,
        retryable: bool,
    ) -> Result<TaskStatus, WorkerError> {
        let max_retries = self.options.max_retries;
        let retry_delay = self.options.retry_delay;
        let status = {
            let task = task.clone();
            let reason = reason.clone();
            self.blocking(move |c| c.record_failure(&task, &reason, retryable, max_retries, retry_delay))
                .await?
        };

        let kind = match status {
            TaskStatus::Retry => TaskEventKind::Retry,
            _ => TaskEventKind::Failure,
        };
        self.emit(&task, kind, reason);
        Ok(status)
    }

    async fn idle(&self) {
        self.pause(self.options.interval).await;
    }

    /// The poll interval plus up to a second of jitter, so workers that hit
    /// the same error do not retry in lockstep.
    async fn back_off(&self) {
        let jitter = rand::thread_rng().gen_range(0..MAX_JITTER_MS);
        self.pause(self.options.interval + Duration::from_millis(jitter)).await;
    }

    async fn pause(&self, period: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = self.cancel.cancelled() => {}
        }
    }

    fn spawn_heartbeat(&self) -> tokio::task::JoinHandle<()> {
        let coordinator = self.coordinator.clone();
        let period = self.options.heartbeat;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let c = coordinator.clone();
                match tokio::task::spawn_blocking(move || c.heartbeat()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("Heartbeat failed: {}", e),
                    Err(e) => warn!("Heartbeat task failed: {}", e),
                }
            }
        })
    }

    fn emit(&self, task: &ClaimedTask, kind: TaskEventKind, message: impl Into<String>) {
        self.events
            .send(TaskEvent::task(kind, &task.task_id, task.analysis_id, message));
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T, WorkerError>
    where
        F: FnOnce(Coordinator) -> Result<T, WorkerError> + Send + 'static,
        T: Send + 'static,
    {
        let coordinator = self.coordinator.clone();
        tokio::task::spawn_blocking(move || f(coordinator))
            .await
            .map_err(|e| WorkerError::Join(e.to_string()))?
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::db::analysis_repo::{self, NewAnalysis};
    use crate::db::file_repo::{self, NewFile};
    use crate::db::location_repo::{self, NewLocation};
    use crate::db::task_repo::{self, NewTask};
    use crate::db::{self, experiment_repo, result_repo, Database};
    use crate::jobs::TaskParams;
    use crate::worker::identity::WorkerIdentity;
    use tempfile::TempDir;

    struct Env {
        dir: TempDir,
        db: Database,
        analysis: i64,
        file: i64,
    }

    fn env() -> Env {
        let dir = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let root = dir.path().to_string_lossy().into_owned();
        let (analysis, file) = db
            .with_conn(|conn| {
                let location = location_repo::upsert(conn, &NewLocation::new(root.clone()))?;
                let experiment = experiment_repo::get_or_create(conn, "ExpA", ".raw")?;
                let file = file_repo::upsert(
                    conn,
                    &NewFile {
                        location_id: location.id,
                        experiment_id: experiment.id,
                        path: "ExpA/a.raw",
                        size: 1,
                        is_bundle: false,
                    },
                    &db::now(),
                )?
                .id();
                file_repo::mark_ready(conn, file, &db::now())?;
                let analysis = analysis_repo::insert(
                    conn,
                    &NewAnalysis {
                        name: "ExpA/search-p1",
                        experiment_id: experiment.id,
                        run_config_id: None,
                        job_type: "library_search",
                        total_files: None,
                        keep_details: false,
                    },
                )?;
                analysis_repo::mark_processing(conn, analysis, "library_search", "sh", &root)?;
                Ok((analysis, file))
            })
            .unwrap();
        std::fs::create_dir_all(dir.path().join("ExpA/p1")).unwrap();
        Env {
            dir,
            db,
            analysis,
            file,
        }
    }

    fn enqueue(env: &Env, argv: Vec<String>) {
        let out = env.dir.path().join("ExpA/p1");
        let params = TaskParams {
            argv,
            file_ids: vec![env.file],
            run_config_id: 1,
            location_id: 1,
            output_folder: out.to_string_lossy().into_owned(),
            report_path: out.join("report.tsv").to_string_lossy().into_owned(),
            keep_details: false,
        }
        .to_json()
        .unwrap();
        env.db
            .with_conn(|conn| {
                task_repo::insert(
                    conn,
                    &NewTask {
                        task_id: "t-1",
                        name: "search",
                        queue_name: "default",
                        analysis_id: env.analysis,
                        params: &params,
                    },
                )
            })
            .unwrap();
    }

    fn runner(env: &Env, max_retries: u32) -> (WorkerRunner, TaskEventBroadcaster) {
        let identity = WorkerIdentity {
            name: "w1".to_string(),
            hostname: "w1-host".to_string(),
        };
        let coordinator = Coordinator::register(env.db.clone(), &identity, vec!["default".to_string()]).unwrap();
        let events = TaskEventBroadcaster::default();
        let options = RunnerOptions {
            interval: Duration::from_millis(10),
            heartbeat: Duration::from_secs(30),
            max_retries,
            retry_delay: Duration::from_secs(300),
            batch: true,
            startup_jitter: false,
        };
        let runner = WorkerRunner::new(
            coordinator,
            options,
            LogBroadcaster::default(),
            events.clone(),
            CancellationToken::new(),
        );
        (runner, events)
    }

    fn polling_runner(env: &Env, cancel: CancellationToken) -> (WorkerRunner, TaskEventBroadcaster) {
        let identity = WorkerIdentity {
            name: "w1".to_string(),
            hostname: "w1-host".to_string(),
        };
        let coordinator = Coordinator::register(env.db.clone(), &identity, vec!["default".to_string()]).unwrap();
        let events = TaskEventBroadcaster::default();
        let options = RunnerOptions {
            interval: Duration::from_millis(20),
            heartbeat: Duration::from_secs(30),
            max_retries: 0,
            retry_delay: Duration::from_secs(300),
            batch: false,
            startup_jitter: false,
        };
        let runner = WorkerRunner::new(coordinator, options, LogBroadcaster::default(), events.clone(), cancel);
        (runner, events)
    }

    fn analysis(env: &Env) -> analysis_repo::AnalysisRow {
        env.db
            .with_conn(|conn| analysis_repo::find_by_id(conn, env.analysis))
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_successful_run_ingests_and_completes() {
        let env = env();
        let stats = env.dir.path().join("ExpA/p1/report.stats.tsv");
        let script = format!(
            "echo searching; printf 'File.Name\\tProteins.Identified\\tPrecursors.Identified\\n{}/ExpA/a.raw\\t10\\t100\\n' > '{}'",
            env.dir.path().display(),
            stats.display()
        );
        enqueue(&env, vec!["/bin/sh".into(), "-c".into(), script]);

        let (runner, events) = runner(&env, 3);
        let mut rx = events.subscribe();
        let summary = runner.run().await.unwrap();
        assert_eq!(summary.succeeded, 1);

        let row = analysis(&env);
        assert!(row.completed);
        let summaries = env
            .db
            .with_conn(|conn| result_repo::list_for_analysis(conn, env.analysis))
            .unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].precursor_identified, 100);

        assert_eq!(rx.try_recv().unwrap().kind, TaskEventKind::Running);
        assert_eq!(rx.try_recv().unwrap().kind, TaskEventKind::Success);

        let worker = env
            .db
            .with_conn(|conn| db::worker_repo::find_by_name(conn, "w1"))
            .unwrap()
            .unwrap();
        assert_eq!(worker.status, STATUS_OFFLINE);
    }

    #[tokio::test]
    async fn test_engine_failure_returns_analysis_to_rest() {
        let env = env();
        enqueue(&env, vec!["/bin/sh".into(), "-c".into(), "echo boom >&2; exit 2".into()]);

        let (runner, _events) = runner(&env, 3);
        let summary = runner.run().await.unwrap();
        assert_eq!(summary.failed, 1);

        let row = analysis(&env);
        assert!(!row.processing);
        assert!(!row.completed);
        let task = env
            .db
            .with_conn(|conn| task_repo::find_by_task_id(conn, "t-1"))
            .unwrap()
            .unwrap();
        assert_eq!(task.status, "failure");
        assert_eq!(task.error.as_deref(), Some("Engine exited with code 2"));
        let lines = env.db.with_conn(|conn| task_repo::log_lines(conn, task.id)).unwrap();
        assert_eq!(lines[0].line, "boom");
        assert_eq!(lines[0].stream, "stderr");
    }

    #[tokio::test]
    async fn test_spawn_error_schedules_retry() {
        let env = env();
        enqueue(&env, vec!["/nonexistent/diann".into()]);

        let (runner, events) = runner(&env, 3);
        let mut rx = events.subscribe();
        let summary = runner.run().await.unwrap();
        assert_eq!(summary.retried, 1);

        let task = env
            .db
            .with_conn(|conn| task_repo::find_by_task_id(conn, "t-1"))
            .unwrap()
            .unwrap();
        assert_eq!(task.status, "retry");
        assert!(task.not_before.is_some());
        assert!(analysis(&env).processing);

        assert_eq!(rx.try_recv().unwrap().kind, TaskEventKind::Running);
        assert_eq!(rx.try_recv().unwrap().kind, TaskEventKind::Retry);
    }

    #[tokio::test]
    async fn test_missing_report_fails_task() {
        let env = env();
        enqueue(&env, vec!["/bin/sh".into(), "-c".into(), "true".into()]);

        let (runner, _events) = runner(&env, 3);
        let summary = runner.run().await.unwrap();
        assert_eq!(summary.failed, 1);
        let task = env
            .db
            .with_conn(|conn| task_repo::find_by_task_id(conn, "t-1"))
            .unwrap()
            .unwrap();
        assert!(task.error.unwrap().starts_with("Result ingestion failed"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_claim_errors_back_off_and_recover() {
        let env = env();
        enqueue(&env, vec!["/bin/sh".into(), "-c".into(), "exec sleep 30".into()]);
        // Every claim fails until the table is back.
        env.db
            .with_conn(|conn| Ok(conn.execute_batch("ALTER TABLE tasks RENAME TO tasks_offline")?))
            .unwrap();

        let cancel = CancellationToken::new();
        let (runner, events) = polling_runner(&env, cancel.clone());
        let mut rx = events.subscribe();

        let db = env.db.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            db.with_conn(|conn| Ok(conn.execute_batch("ALTER TABLE tasks_offline RENAME TO tasks")?))
                .unwrap();
        });
        let canceller = cancel.clone();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if event.kind == TaskEventKind::Running {
                    break;
                }
            }
            canceller.cancel();
        });

        let summary = tokio::time::timeout(Duration::from_secs(20), runner.run())
            .await
            .expect("worker kept running after cancellation")
            .unwrap();
        assert_eq!(summary.failed, 1);

        let task = env
            .db
            .with_conn(|conn| task_repo::find_by_task_id(conn, "t-1"))
            .unwrap()
            .unwrap();
        assert_eq!(task.error.as_deref(), Some("Cancelled"));
        let worker = env
            .db
            .with_conn(|conn| db::worker_repo::find_by_name(conn, "w1"))
            .unwrap()
            .unwrap();
        assert_eq!(worker.status, STATUS_OFFLINE);
    }
}
