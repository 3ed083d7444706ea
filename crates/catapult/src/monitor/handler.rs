//! Applies filesystem changes under one watch location to the catalog.

use std::path::Path;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::bundle::{entry_size, is_missing};
use super::filter::{experiment_name, relative_path, EntryFilter, EntryKind};
use crate::broadcast::{MonitorEvent, MonitorEventBroadcaster, MonitorEventKind};
use crate::db::file_repo::{self, NewFile, UpsertOutcome};
use crate::db::location_repo::LocationRow;
use crate::db::{self, experiment_repo, Database};
use crate::error::MonitorError;
use crate::resolver::{ingest_descriptor, RegistrationOutcome};

/// Counts from a full walk of a location.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub files: usize,
    pub descriptors: usize,
    pub pruned: usize,
}

pub struct LocationHandler {
    db: Database,
    location: LocationRow,
    filter: EntryFilter,
    events: MonitorEventBroadcaster,
}

impl LocationHandler {
    pub fn new(db: Database, location: LocationRow, events: MonitorEventBroadcaster) -> Self {
        let filter = EntryFilter::from_location(&location);
        Self {
            db,
            location,
            filter,
            events,
        }
    }

    pub fn location(&self) -> &LocationRow {
        &self.location
    }

    fn relative(&self, path: &Path) -> Result<String, MonitorError> {
        relative_path(self.location.root(), path).ok_or_else(|| MonitorError::OutsideRoot {
            path: path.to_path_buf(),
            root: self.location.root().to_path_buf(),
        })
    }

    fn emit(&self, kind: MonitorEventKind, path: &str, detail: Option<String>) {
        let event = MonitorEvent::new(kind, self.location.id, path);
        self.events.send(match detail {
            Some(detail) => event.with_detail(detail),
            None => event,
        });
    }

    /// An entry appeared or changed.
    pub fn upsert(&self, path: &Path) -> Result<(), MonitorError> {
        let relative = self.relative(path)?;
        match self.filter.classify(&relative) {
            EntryKind::Ignored => Ok(()),
            EntryKind::Descriptor => {
                self.ingest_descriptor(path, &relative);
                Ok(())
            }
            EntryKind::Raw {
                logical,
                vendor,
                bundle,
            } => self.upsert_record(&logical, &vendor, bundle),
        }
    }

    fn ingest_descriptor(&self, path: &Path, relative: &str) {
        if !path.is_file() {
            return;
        }
        match ingest_descriptor(&self.db, &self.location, path) {
            Ok(RegistrationOutcome::Registered { run_config_id, .. }) => {
                self.emit(
                    MonitorEventKind::DescriptorIngested,
                    relative,
                    Some(format!("run config {}", run_config_id)),
                );
            }
            Ok(RegistrationOutcome::AlreadyRegistered(_)) | Ok(RegistrationOutcome::NotReady) => {}
            Err(e) => {
                warn!("Skipping descriptor {}: {}", path.display(), e);
                self.emit(MonitorEventKind::DescriptorRejected, relative, Some(e.to_string()));
            }
        }
    }

    fn upsert_record(&self, logical: &str, vendor: &str, bundle: bool) -> Result<(), MonitorError> {
        let absolute = self.location.absolute(logical);
        let size = match entry_size(&absolute, bundle) {
            Ok(size) => size,
            Err(e) if is_missing(&e) => {
                debug!("{} vanished before it could be measured", absolute.display());
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let experiment = experiment_name(logical);
        let outcome = self.db.transaction(|conn| -> Result<UpsertOutcome, MonitorError> {
            let experiment_row = experiment_repo::get_or_create(conn, &experiment, vendor)?;
            Ok(file_repo::upsert(
                conn,
                &NewFile {
                    location_id: self.location.id,
                    experiment_id: experiment_row.id,
                    path: logical,
                    size: size as i64,
                    is_bundle: bundle,
                },
                &db::now(),
            )?)
        })?;

        match outcome {
            UpsertOutcome::Created(id) => {
                info!("Catalogued {} ({} bytes) as file {}", logical, size, id);
                self.emit(MonitorEventKind::FileCreated, logical, None);
            }
            UpsertOutcome::Resized(id) => {
                debug!("File {} ({}) is now {} bytes", id, logical, size);
                self.emit(MonitorEventKind::FileResized, logical, Some(size.to_string()));
            }
            UpsertOutcome::Unchanged(_) => {}
        }
        Ok(())
    }

    /// An entry disappeared.
    pub fn remove(&self, path: &Path) -> Result<(), MonitorError> {
        let relative = self.relative(path)?;
        match self.filter.classify(&relative) {
            EntryKind::Descriptor => {
                debug!("Descriptor {} removed; its run config is kept", relative);
                Ok(())
            }
            EntryKind::Raw {
                logical,
                vendor,
                bundle,
            } => {
                if bundle && logical != relative && self.location.absolute(&logical).exists() {
                    return self.upsert_record(&logical, &vendor, bundle);
                }
                self.delete_record(&logical)
            }
            // A removed directory takes its records with it.
            EntryKind::Ignored => self.delete_record(&relative),
        }
    }

    fn delete_record(&self, logical: &str) -> Result<(), MonitorError> {
        let removed = self
            .db
            .with_conn(|conn| file_repo::delete_path(conn, self.location.id, logical))?;
        if removed > 0 {
            info!("Removed {} record(s) at {}", removed, logical);
            self.emit(MonitorEventKind::FileRemoved, logical, None);
        }
        Ok(())
    }

    /// An entry moved from `from` to `to`, both inside the location.
    pub fn rename(&self, from: &Path, to: &Path) -> Result<(), MonitorError> {
        let from_rel = self.relative(from)?;
        let to_rel = self.relative(to)?;

        match (self.filter.classify(&from_rel), self.filter.classify(&to_rel)) {
            (
                EntryKind::Raw {
                    logical: from_logical,
                    ..
                },
                EntryKind::Raw {
                    logical: to_logical,
                    vendor,
                    bundle,
                },
            ) if from_logical == from_rel && to_logical == to_rel => {
                let existing = self
                    .db
                    .with_conn(|conn| file_repo::find_by_path(conn, self.location.id, &from_logical))?;
                match existing {
                    Some(record) => {
                        let experiment = experiment_name(&to_logical);
                        self.db.transaction(|conn| -> Result<(), MonitorError> {
                            let experiment_row = experiment_repo::get_or_create(conn, &experiment, &vendor)?;
                            file_repo::relocate(conn, record.id, &to_logical, experiment_row.id, &db::now())?;
                            Ok(())
                        })?;
                        info!("Moved file {} from {} to {}", record.id, from_logical, to_logical);
                        self.emit(MonitorEventKind::FileMoved, &to_logical, Some(from_logical));
                        Ok(())
                    }
                    None => self.upsert_record(&to_logical, &vendor, bundle),
                }
            }
            (EntryKind::Raw { .. }, _) => {
                self.remove(from)?;
                self.upsert(to)
            }
            (_, EntryKind::Ignored) if to.is_dir() => {
                self.move_tree(&from_rel, &to_rel)?;
                self.scan_tree(to).map(|_| ())
            }
            _ => self.upsert(to),
        }
    }

    /// Rewrites the paths of every record under a moved directory, keeping
    /// their ids. Records that land somewhere unrecognized are dropped.
    fn move_tree(&self, from_rel: &str, to_rel: &str) -> Result<(), MonitorError> {
        let prefix = format!("{}/", from_rel.trim_end_matches('/'));
        let (moved, dropped) = self.db.transaction(|conn| -> Result<(usize, usize), MonitorError> {
            let stamp = db::now();
            let (mut moved, mut dropped) = (0, 0);
            for record in file_repo::list_under(conn, self.location.id, from_rel)? {
                let Some(rest) = record.path.strip_prefix(&prefix) else {
                    continue;
                };
                let new_path = format!("{}/{}", to_rel.trim_end_matches('/'), rest);
                match self.filter.classify(&new_path) {
                    EntryKind::Raw { logical, vendor, .. } if logical == new_path => {
                        let experiment = experiment_repo::get_or_create(conn, &experiment_name(&new_path), &vendor)?;
                        file_repo::relocate(conn, record.id, &new_path, experiment.id, &stamp)?;
                        moved += 1;
                    }
                    _ => {
                        file_repo::delete(conn, record.id)?;
                        dropped += 1;
                    }
                }
            }
            Ok((moved, dropped))
        })?;

        if moved > 0 {
            info!("Moved {} record(s) from {} to {}", moved, from_rel, to_rel);
            self.emit(MonitorEventKind::FileMoved, to_rel, Some(from_rel.to_string()));
        }
        if dropped > 0 {
            info!("Removed {} record(s) moved out of view under {}", dropped, to_rel);
            self.emit(MonitorEventKind::FileRemoved, from_rel, None);
        }
        Ok(())
    }

    /// Walks the whole location, cataloguing every recognized entry and
    /// dropping records whose files are gone.
    pub fn initial_scan(&self) -> Result<ScanSummary, MonitorError> {
        let root = self.location.root().to_path_buf();
        if !root.is_dir() {
            return Err(MonitorError::MissingRoot(root));
        }

        let mut summary = self.scan_tree(&root)?;

        let records = self
            .db
            .with_conn(|conn| file_repo::list_for_location(conn, self.location.id))?;
        for record in records {
            if !self.location.absolute(&record.path).exists() {
                self.delete_record(&record.path)?;
                summary.pruned += 1;
            }
        }

        info!(
            "Initial scan of {}: {} file(s), {} descriptor(s), {} stale record(s) pruned",
            root.display(),
            summary.files,
            summary.descriptors,
            summary.pruned
        );
        Ok(summary)
    }

    fn scan_tree(&self, dir: &Path) -> Result<ScanSummary, MonitorError> {
        let mut summary = ScanSummary::default();
        let mut walker = WalkDir::new(dir).sort_by_file_name().into_iter();

        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", dir.display(), e);
                    continue;
                }
            };
            let Some(relative) = relative_path(self.location.root(), entry.path()) else {
                continue;
            };

            match self.filter.classify(&relative) {
                EntryKind::Ignored => {
                    if entry.file_type().is_dir() && self.filter.is_ignored(&relative) {
                        walker.skip_current_dir();
                    }
                }
                EntryKind::Descriptor => {
                    self.ingest_descriptor(entry.path(), &relative);
                    summary.descriptors += 1;
                }
                EntryKind::Raw {
                    logical,
                    vendor,
                    bundle,
                } => {
                    if bundle && entry.file_type().is_dir() {
                        walker.skip_current_dir();
                    }
                    if let Err(e) = self.upsert_record(&logical, &vendor, bundle) {
                        warn!("Failed to catalogue {}: {}", logical, e);
                        continue;
                    }
                    summary.files += 1;
                }
            }
        }

        Ok(summary)
    }
}
