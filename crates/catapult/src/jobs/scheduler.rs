//! The scheduling pass: refresh reference readiness, resolve analyses at
//! rest into commands, enqueue tasks, and report stalled work.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, info_span, warn};

use super::completion::{evaluate_completion, CompletionCheck};
use super::state::AnalysisState;
use super::TaskParams;
use crate::broadcast::{TaskEvent, TaskEventBroadcaster};
use crate::db::analysis_repo::{self, AnalysisRow};
use crate::db::reference_repo::{self, ReferenceKind};
use crate::db::task_repo::{self, NewTask, StalledTask};
use crate::db::{self, experiment_repo, file_repo, location_repo, run_config_repo, Database};
use crate::error::{JobError, ResolveError};
use crate::resolver::{plan, CandidateFile, Descriptor, PlanInput, ResolvedCommand};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleReport {
    pub examined: usize,
    pub enqueued: usize,
    pub completed: usize,
    pub waiting: usize,
}

pub struct Scheduler {
    db: Database,
    events: TaskEventBroadcaster,
    default_engine: String,
    queue: String,
}

impl Scheduler {
    pub fn new(db: Database, events: TaskEventBroadcaster, default_engine: impl Into<String>) -> Self {
        Self {
            db,
            events,
            default_engine: default_engine.into(),
            queue: super::DEFAULT_QUEUE.to_string(),
        }
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn run_cycle(&self) -> Result<ScheduleReport, JobError> {
        let span = info_span!("schedule");
        let _guard = span.enter();

        let analyses = self.db.with_conn(analysis_repo::list_at_rest)?;
        let mut report = ScheduleReport {
            examined: analyses.len(),
            ..Default::default()
        };

        for analysis in analyses {
            match self.db.with_conn(|conn| Ok(evaluate_completion(conn, analysis.id)))? {
                Ok(CompletionCheck::Completed) => {
                    report.completed += 1;
                    continue;
                }
                Ok(CompletionCheck::AlreadyCompleted) => continue,
                Ok(CompletionCheck::Pending { .. }) => {}
                Err(e @ JobError::ClaimedFilesOutstanding { .. }) => {
                    self.alert(Some(analysis.id), &e);
                    continue;
                }
                Err(e) => return Err(e),
            }

            match self.schedule(&analysis) {
                Ok(true) => report.enqueued += 1,
                Ok(false) => report.waiting += 1,
                Err(JobError::Resolve(e)) => {
                    warn!("Could not resolve analysis {}: {}", analysis.id, e);
                    report.waiting += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if report.enqueued > 0 || report.completed > 0 {
            info!(
                "Schedule cycle: {} examined, {} enqueued, {} completed",
                report.examined, report.enqueued, report.completed
            );
        }
        Ok(report)
    }

    /// Resolves one analysis at rest. Returns whether a task was enqueued.
    fn schedule(&self, analysis: &AnalysisRow) -> Result<bool, JobError> {
        let state = AnalysisState::from_flags(analysis.processing, analysis.completed)
            .transition(AnalysisState::Resolving)?;

        let Some(run_config_id) = analysis.run_config_id else {
            return Ok(false);
        };
        let config = self
            .db
            .with_conn(|conn| run_config_repo::find_by_id(conn, run_config_id))?
            .ok_or(JobError::AnalysisNotFound(analysis.id))?;
        let location = self
            .db
            .with_conn(|conn| location_repo::find_by_id(conn, config.location_id))?
            .ok_or(JobError::AnalysisNotFound(analysis.id))?;
        let experiment = self
            .db
            .with_conn(|conn| experiment_repo::find_by_id(conn, config.experiment_id))?
            .ok_or(JobError::AnalysisNotFound(analysis.id))?;

        let prerequisites_ready = self.refresh_references(config.id)?;

        let descriptor =
            Descriptor::from_json(&config.content).map_err(|e| ResolveError::Serialize(e.to_string()))?;
        let descriptor_path = Path::new(&config.descriptor_path);
        let descriptor_dir = descriptor_path.parent().unwrap_or(location.root());

        let (files, completed, claimed) = self.db.with_conn(|conn| {
            let files: Vec<CandidateFile> = file_repo::list_for_experiment(conn, experiment.id)?
                .into_iter()
                .filter(|f| f.location_id == location.id)
                .map(|f| CandidateFile {
                    id: f.id,
                    path: f.path,
                    ready: f.ready,
                })
                .collect();
            let completed: HashSet<i64> = analysis_repo::completed_file_ids(conn, analysis.id)?.into_iter().collect();
            let claimed: HashSet<i64> = analysis_repo::claimed_file_ids(conn, analysis.id)?.into_iter().collect();
            Ok((files, completed, claimed))
        })?;

        let resolved = plan(&PlanInput {
            descriptor: &descriptor,
            location_root: location.root(),
            descriptor_dir,
            experiment: &experiment.name,
            prefix: &config.prefix,
            default_engine: &self.default_engine,
            prerequisites_ready,
            declared_total: analysis.total_files.map(|n| n.max(0) as u64),
            files: &files,
            completed: &completed,
            claimed: &claimed,
        });

        let Some(command) = resolved else {
            state.transition(AnalysisState::Created)?;
            debug!("Analysis {} has nothing to run yet", analysis.id);
            return Ok(false);
        };
        state.transition(AnalysisState::Processing)?;

        command.prepare_folders()?;
        let keep_details = descriptor.keep_details || analysis.keep_details;
        self.enqueue(analysis, config.id, location.id, keep_details, &command)
    }

    fn enqueue(
        &self,
        analysis: &AnalysisRow,
        run_config_id: i64,
        location_id: i64,
        keep_details: bool,
        command: &ResolvedCommand,
    ) -> Result<bool, JobError> {
        let params = TaskParams {
            argv: command.argv.clone(),
            file_ids: command.file_ids.clone(),
            run_config_id,
            location_id,
            output_folder: command.output_folder.to_string_lossy().into_owned(),
            report_path: command.report_path.to_string_lossy().into_owned(),
            keep_details,
        };
        let params_json = params
            .to_json()
            .map_err(|e| ResolveError::Serialize(e.to_string()))?;
        let task_id = uuid::Uuid::new_v4().to_string();
        let command_text = command.command_text();
        let output_folder = params.output_folder.clone();

        let enqueued = self.db.transaction(|conn| -> Result<bool, JobError> {
            if !analysis_repo::mark_processing(
                conn,
                analysis.id,
                command.job_type.as_str(),
                &command_text,
                &output_folder,
            )? {
                return Ok(false);
            }
            task_repo::insert(
                conn,
                &NewTask {
                    task_id: &task_id,
                    name: &analysis.name,
                    queue_name: &self.queue,
                    analysis_id: analysis.id,
                    params: &params_json,
                },
            )?;
            Ok(true)
        })?;

        if enqueued {
            info!(
                "Enqueued task {} for analysis {} ({}, {} file(s))",
                task_id,
                analysis.id,
                command.job_type,
                command.file_ids.len()
            );
        }
        Ok(enqueued)
    }

    /// Updates reference file readiness for a run config and returns whether
    /// every required reference is ready. A reference is ready once its
    /// on-disk size is nonzero and equal to the recorded size; otherwise
    /// the recorded size is refreshed.
    fn refresh_references(&self, run_config_id: i64) -> Result<bool, JobError> {
        let config = self
            .db
            .with_conn(|conn| run_config_repo::find_by_id(conn, run_config_id))?
            .ok_or(JobError::AnalysisNotFound(run_config_id))?;
        let references = self
            .db
            .with_conn(|conn| reference_repo::list_for_run_config(conn, run_config_id))?;

        let mut fasta_ready = true;
        let mut library_ready = true;

        for reference in &references {
            let ready = if reference.ready {
                true
            } else {
                let size = std::fs::metadata(&reference.path).map(|m| m.len() as i64).unwrap_or(0);
                let ready = size > 0 && size == reference.size;
                self.db.with_conn(|conn| {
                    if ready {
                        reference_repo::mark_ready(conn, reference.id)
                    } else if size != reference.size {
                        reference_repo::update_size(conn, reference.id, size)
                    } else {
                        Ok(())
                    }
                })?;
                if !ready {
                    debug!("Reference {} not ready ({} bytes)", reference.path, size);
                }
                ready
            };

            match reference.kind {
                ReferenceKind::Fasta => fasta_ready &= ready,
                ReferenceKind::Library => library_ready &= ready,
            }
        }

        if fasta_ready != config.fasta_ready || library_ready != config.library_ready {
            self.db.with_conn(|conn| {
                run_config_repo::set_reference_readiness(conn, run_config_id, fasta_ready, library_ready)
            })?;
        }

        Ok((!config.fasta_required || fasta_ready) && (!config.library_required || library_ready))
    }

    /// Running tasks whose worker has not been seen within `threshold`.
    /// Each one is logged and broadcast as an alert; nothing is reset.
    pub fn stall_report(&self, threshold: Duration, now: DateTime<Utc>) -> Result<Vec<StalledTask>, JobError> {
        let cutoff = db::timestamp(now - chrono::Duration::seconds(threshold.as_secs() as i64));
        let stalled = self.db.with_conn(|conn| task_repo::list_stalled(conn, &cutoff))?;
        for task in &stalled {
            let message = format!(
                "Task {} of analysis {} has been running since {} on worker {} (last seen {})",
                task.task_id,
                task.analysis_id,
                task.started_at.as_deref().unwrap_or("?"),
                task.worker_name.as_deref().unwrap_or("?"),
                task.worker_last_seen.as_deref().unwrap_or("never"),
            );
            error!("{}", message);
            self.events.send(TaskEvent::alert(Some(task.analysis_id), message));
        }
        Ok(stalled)
    }

    fn alert(&self, analysis_id: Option<i64>, error: &JobError) {
        error!("{}", error);
        self.events.send(TaskEvent::alert(analysis_id, error.to_string()));
    }
}
