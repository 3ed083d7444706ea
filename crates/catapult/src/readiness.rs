//! Settle detection: a file record becomes ready once its size has stopped
//! changing for the threshold period.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::db::file_repo::{self, FileRow};
use crate::db::location_repo::{self, LocationRow};
use crate::db::{self, Database};
use crate::error::MonitorError;
use crate::monitor::bundle::{entry_size, is_missing};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessReport {
    pub checked: usize,
    pub ready: usize,
    pub resized: usize,
    pub skipped: usize,
}

/// What a measurement found. `Ready` carries the size it was confirmed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Ready(i64, i64),
    Resized(i64, i64),
}

pub struct ReadinessDetector {
    db: Database,
    threshold: Duration,
}

impl ReadinessDetector {
    pub fn new(db: Database, threshold: Duration) -> Self {
        Self { db, threshold }
    }

    pub fn run_cycle(&self) -> Result<ReadinessReport, MonitorError> {
        self.run_cycle_at(Utc::now())
    }

    /// One detector pass as if the clock read `now`.
    pub fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<ReadinessReport, MonitorError> {
        let threshold = chrono::Duration::seconds(self.threshold.as_secs() as i64);
        let cutoff = db::timestamp(now - threshold);
        let stamp = db::timestamp(now);

        let candidates = self
            .db
            .with_conn(|conn| file_repo::list_settled_candidates(conn, &cutoff))?;

        let mut report = ReadinessReport {
            checked: candidates.len(),
            ..Default::default()
        };
        let mut locations: HashMap<i64, LocationRow> = HashMap::new();
        let mut bundle_verdicts = Vec::new();

        for file in &candidates {
            let location = match locations.get(&file.location_id) {
                Some(location) => location.clone(),
                None => {
                    let Some(location) = self
                        .db
                        .with_conn(|conn| location_repo::find_by_id(conn, file.location_id))?
                    else {
                        report.skipped += 1;
                        continue;
                    };
                    locations.insert(location.id, location.clone());
                    location
                }
            };

            let Some(verdict) = measure(&location, file, &mut report)? else {
                continue;
            };

            if file.is_bundle {
                bundle_verdicts.push(verdict);
            } else {
                let applied = self.db.with_conn(|conn| apply(conn, &verdict, &stamp))?;
                report.count(&verdict, applied);
            }
        }

        if !bundle_verdicts.is_empty() {
            let applied = self.db.transaction(|conn| -> Result<Vec<bool>, MonitorError> {
                let mut applied = Vec::with_capacity(bundle_verdicts.len());
                for verdict in &bundle_verdicts {
                    applied.push(apply(conn, verdict, &stamp)?);
                }
                Ok(applied)
            })?;
            for (verdict, applied) in bundle_verdicts.iter().zip(applied) {
                report.count(verdict, applied);
            }
        }

        if report.ready > 0 || report.resized > 0 {
            info!(
                "Readiness cycle: {} checked, {} ready, {} still changing, {} skipped",
                report.checked, report.ready, report.resized, report.skipped
            );
        }
        Ok(report)
    }
}

fn measure(
    location: &LocationRow,
    file: &FileRow,
    report: &mut ReadinessReport,
) -> Result<Option<Verdict>, MonitorError> {
    let path = location.absolute(&file.path);
    let size = match entry_size(&path, file.is_bundle) {
        Ok(size) => size,
        Err(e) if is_missing(&e) => {
            debug!("{} is missing; retrying next cycle", path.display());
            report.skipped += 1;
            return Ok(None);
        }
        Err(e) => {
            warn!("Could not measure {}: {}", path.display(), e);
            report.skipped += 1;
            return Ok(None);
        }
    };

    let size = size as i64;
    if size == file.size {
        Ok(Some(Verdict::Ready(file.id, size)))
    } else {
        Ok(Some(Verdict::Resized(file.id, size)))
    }
}

/// Writes a verdict. A ready verdict only lands if the record still has the
/// measured size; the monitor may have recorded growth since.
fn apply(conn: &rusqlite::Connection, verdict: &Verdict, stamp: &str) -> Result<bool, crate::db::DatabaseError> {
    match *verdict {
        Verdict::Ready(id, size) => file_repo::mark_ready_at_size(conn, id, size, stamp),
        Verdict::Resized(id, size) => {
            file_repo::update_size(conn, id, size, stamp)?;
            Ok(true)
        }
    }
}

impl ReadinessReport {
    fn count(&mut self, verdict: &Verdict, applied: bool) {
        match verdict {
            Verdict::Ready(..) if applied => self.ready += 1,
            Verdict::Ready(..) => {
                debug!("{:?} lost to a newer size; retrying next cycle", verdict);
                self.skipped += 1;
            }
            Verdict::Resized(..) => self.resized += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::MonitorEventBroadcaster;
    use crate::db::location_repo::NewLocation;
    use crate::monitor::LocationHandler;
    use tempfile::TempDir;

    const THRESHOLD: Duration = Duration::from_secs(300);

    fn setup() -> (TempDir, Database, LocationHandler, ReadinessDetector) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let location = db
            .with_conn(|conn| location_repo::upsert(conn, &NewLocation::new(dir.path().to_string_lossy())))
            .unwrap();
        let handler = LocationHandler::new(db.clone(), location, MonitorEventBroadcaster::default());
        let detector = ReadinessDetector::new(db.clone(), THRESHOLD);
        (dir, db, handler, detector)
    }

    fn row(db: &Database, path: &str) -> FileRow {
        db.with_conn(|conn| file_repo::find_by_path(conn, 1, path)).unwrap().unwrap()
    }

    fn later(minutes: i64) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::minutes(minutes)
    }

    #[test]
    fn test_stable_file_becomes_ready_after_threshold() {
        let (dir, db, handler, detector) = setup();
        std::fs::create_dir_all(dir.path().join("ExpA")).unwrap();
        let file = dir.path().join("ExpA/run1.raw");
        std::fs::write(&file, vec![1u8; 64]).unwrap();
        handler.upsert(&file).unwrap();

        let report = detector.run_cycle_at(Utc::now()).unwrap();
        assert_eq!(report.checked, 0);
        assert!(!row(&db, "ExpA/run1.raw").ready);

        let report = detector.run_cycle_at(later(6)).unwrap();
        assert_eq!(report.ready, 1);
        assert!(row(&db, "ExpA/run1.raw").ready);
    }

    #[test]
    fn test_growing_file_rearms_threshold() {
        let (dir, db, handler, detector) = setup();
        let file = dir.path().join("run1.raw");
        std::fs::write(&file, vec![1u8; 10]).unwrap();
        handler.upsert(&file).unwrap();
        std::fs::write(&file, vec![1u8; 20]).unwrap();

        let report = detector.run_cycle_at(later(6)).unwrap();
        assert_eq!(report.resized, 1);
        let record = row(&db, "run1.raw");
        assert!(!record.ready);
        assert_eq!(record.size, 20);
    }

    #[test]
    fn test_bundle_not_ready_while_measurements_differ() {
        let (dir, db, handler, detector) = setup();
        let bundle = dir.path().join("sample.d");
        std::fs::create_dir_all(&bundle).unwrap();
        std::fs::write(bundle.join("a.bin"), vec![0u8; 8]).unwrap();
        handler.upsert(&bundle.join("a.bin")).unwrap();

        std::fs::write(bundle.join("b.bin"), vec![0u8; 8]).unwrap();
        detector.run_cycle_at(later(6)).unwrap();
        let record = row(&db, "sample.d");
        assert!(!record.ready);
        assert_eq!(record.size, 16);

        // Unchanged since the last measurement, but the threshold has not
        // elapsed since that measurement.
        detector.run_cycle_at(Utc::now()).unwrap();
        assert!(!row(&db, "sample.d").ready);

        detector.run_cycle_at(later(12)).unwrap();
        assert!(row(&db, "sample.d").ready);
    }

    #[test]
    fn test_growth_after_measurement_blocks_ready() {
        let (dir, db, handler, _) = setup();
        let file = dir.path().join("run1.raw");
        std::fs::write(&file, vec![1u8; 10]).unwrap();
        handler.upsert(&file).unwrap();

        let location = db.with_conn(|conn| location_repo::find_by_id(conn, 1)).unwrap().unwrap();
        let mut report = ReadinessReport::default();
        let verdict = measure(&location, &row(&db, "run1.raw"), &mut report).unwrap().unwrap();
        assert!(matches!(verdict, Verdict::Ready(_, 10)));

        std::fs::write(&file, vec![1u8; 50]).unwrap();
        handler.upsert(&file).unwrap();

        let applied = db
            .with_conn(|conn| apply(conn, &verdict, &db::timestamp(later(6))))
            .unwrap();
        assert!(!applied);
        let record = row(&db, "run1.raw");
        assert!(!record.ready);
        assert_eq!(record.size, 50);
    }

    #[test]
    fn test_missing_file_is_skipped() {
        let (dir, db, handler, detector) = setup();
        let file = dir.path().join("run1.raw");
        std::fs::write(&file, b"abc").unwrap();
        handler.upsert(&file).unwrap();
        std::fs::remove_file(&file).unwrap();

        let report = detector.run_cycle_at(later(6)).unwrap();
        assert_eq!(report.skipped, 1);
        assert!(!row(&db, "run1.raw").ready);
    }
}
