//! Deciding when an analysis has processed every input it is waiting for.

use rusqlite::Connection;
use tracing::info;

use crate::db::{analysis_repo, file_repo, run_config_repo};
use crate::error::JobError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionCheck {
    Completed,
    AlreadyCompleted,
    Pending { completed: u64, target: u64 },
}

/// Marks the analysis completed once its completed-file count reaches the
/// target: the declared total when known, else the experiment's ready files
/// in the location its run config was registered from.
///
/// Claimed files that never completed make completion an invariant
/// violation; the analysis is left as it is and the error returned.
pub fn evaluate_completion(conn: &Connection, analysis_id: i64) -> Result<CompletionCheck, JobError> {
    let analysis = analysis_repo::find_by_id(conn, analysis_id)?.ok_or(JobError::AnalysisNotFound(analysis_id))?;
    if analysis.completed {
        return Ok(CompletionCheck::AlreadyCompleted);
    }

    let target = match analysis.total_files {
        Some(total) => total.max(0) as u64,
        None => {
            let location_id = match analysis.run_config_id {
                Some(id) => run_config_repo::find_by_id(conn, id)?.map(|config| config.location_id),
                None => None,
            };
            file_repo::count_ready(conn, analysis.experiment_id, location_id)?.max(0) as u64
        }
    };
    let completed = analysis_repo::completed_file_ids(conn, analysis_id)?.len() as u64;

    if target == 0 || completed < target {
        return Ok(CompletionCheck::Pending { completed, target });
    }

    let outstanding = analysis_repo::count_outstanding_claims(conn, analysis_id)?;
    if outstanding > 0 {
        return Err(JobError::ClaimedFilesOutstanding {
            analysis_id,
            outstanding: outstanding as u64,
        });
    }

    analysis_repo::mark_completed(conn, analysis_id)?;
    info!("Analysis {} ('{}') completed with {} file(s)", analysis_id, analysis.name, completed);
    Ok(CompletionCheck::Completed)
}
