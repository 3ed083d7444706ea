//! Copies the engine's per-run statistics (and optionally the quantity
//! matrices) into the catalog after a successful task.

pub mod report;

use std::path::Path;

use tracing::{debug, info, warn};

use crate::db::location_repo::LocationRow;
use crate::db::result_repo::{self, NewSummary};
use crate::db::{file_repo, Database};
use crate::error::IngestError;
use crate::monitor::filter::relative_path;

pub use report::{read_stats, sibling, MatrixReport, StatsRow};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub file_ids: Vec<i64>,
}

/// What to ingest and where it lives.
#[derive(Debug, Clone, Copy)]
pub struct IngestRequest<'a> {
    pub analysis_id: i64,
    pub location: &'a LocationRow,
    pub report_path: &'a Path,
    pub keep_details: bool,
}

/// Catalog path of a `File.Name` as the engine printed it: the location root
/// is stripped and separators normalized to `/`.
pub fn catalog_path(root: &str, file_name: &str) -> String {
    let root = root.replace('\\', "/");
    let root = root.trim_end_matches('/');
    let name = file_name.replace('\\', "/");
    let stripped = if root.is_empty() {
        name.as_str()
    } else {
        name.strip_prefix(root).unwrap_or(&name)
    };
    stripped.trim_start_matches('/').to_string()
}

struct Matched {
    summary_id: i64,
    file_id: i64,
    file_name: String,
}

/// Upserts one result summary per row of the statistics report.
///
/// Rows that do not resolve to a catalogued file are skipped. Identical
/// counts cause no write, so re-ingesting an unchanged report is a no-op.
pub fn ingest_results(db: &Database, request: &IngestRequest<'_>) -> Result<IngestReport, IngestError> {
    let stats_path = sibling(request.report_path, report::STATS_SUFFIX, "tsv");
    let log_path = sibling(request.report_path, "log", "txt");
    let root = request.location.root();
    let stats_file = relative_path(root, &stats_path).unwrap_or_else(|| stats_path.display().to_string());
    let log_file = relative_path(root, &log_path).unwrap_or_else(|| log_path.display().to_string());

    let rows = read_stats(&stats_path)?;
    let mut outcome = IngestReport::default();

    let matched = db.transaction(|conn| -> Result<Vec<Matched>, IngestError> {
        let mut matched = Vec::new();
        for row in &rows {
            let path = catalog_path(&request.location.root_path, &row.file_name);
            let Some(file) = file_repo::find_by_path(conn, request.location.id, &path)? else {
                warn!("Report row '{}' does not match a catalogued file; skipping", row.file_name);
                outcome.skipped += 1;
                continue;
            };

            let summary_id = match result_repo::find(conn, request.analysis_id, file.id)? {
                Some(existing)
                    if existing.protein_identified == row.proteins
                        && existing.precursor_identified == row.precursors =>
                {
                    outcome.unchanged += 1;
                    existing.id
                }
                Some(existing) => {
                    result_repo::update_counts(conn, existing.id, row.proteins, row.precursors, &stats_file)?;
                    outcome.updated += 1;
                    existing.id
                }
                None => {
                    let id = result_repo::insert(
                        conn,
                        &NewSummary {
                            analysis_id: request.analysis_id,
                            file_id: file.id,
                            protein_identified: row.proteins,
                            precursor_identified: row.precursors,
                            stats_file: &stats_file,
                            log_file: &log_file,
                        },
                    )?;
                    outcome.created += 1;
                    id
                }
            };

            outcome.file_ids.push(file.id);
            matched.push(Matched {
                summary_id,
                file_id: file.id,
                file_name: row.file_name.clone(),
            });
        }
        Ok(matched)
    })?;

    if request.keep_details && !matched.is_empty() {
        ingest_details(db, request.report_path, &matched)?;
    }

    info!(
        "Ingested {}: {} created, {} updated, {} unchanged, {} skipped",
        stats_path.display(),
        outcome.created,
        outcome.updated,
        outcome.unchanged,
        outcome.skipped
    );
    Ok(outcome)
}

fn ingest_details(db: &Database, report_path: &Path, matched: &[Matched]) -> Result<(), IngestError> {
    let precursor_path = sibling(report_path, report::PRECURSOR_MATRIX_SUFFIX, "tsv");
    match MatrixReport::read(&precursor_path) {
        Ok(matrix) => db.transaction(|conn| -> Result<(), IngestError> {
            for m in matched {
                // A run the matrix no longer lists has its old rows cleared.
                let rows = if matrix.has_run(&m.file_name) {
                    matrix.precursors_for(&m.file_name)?
                } else {
                    Vec::new()
                };
                debug!("{} precursor row(s) for {}", rows.len(), m.file_name);
                result_repo::replace_precursors(conn, m.summary_id, m.file_id, &rows)?;
            }
            Ok(())
        })?,
        Err(IngestError::MissingReport(path)) => warn!("No precursor matrix at {}", path.display()),
        Err(e) => return Err(e),
    }

    let group_path = sibling(report_path, report::PROTEIN_GROUP_MATRIX_SUFFIX, "tsv");
    match MatrixReport::read(&group_path) {
        Ok(matrix) => db.transaction(|conn| -> Result<(), IngestError> {
            for m in matched {
                let rows = if matrix.has_run(&m.file_name) {
                    matrix.protein_groups_for(&m.file_name)?
                } else {
                    Vec::new()
                };
                result_repo::replace_protein_groups(conn, m.summary_id, m.file_id, &rows)?;
            }
            Ok(())
        })?,
        Err(IngestError::MissingReport(path)) => warn!("No protein-group matrix at {}", path.display()),
        Err(e) => return Err(e),
    }
    Ok(())
}
