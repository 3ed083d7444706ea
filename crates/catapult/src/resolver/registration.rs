//! Turning a ready descriptor file into a run configuration and its
//! analysis.

use std::path::Path;

use tracing::{debug, info};

use super::descriptor::{descriptor_stem, Descriptor};
use super::plan::job_type_for;
use crate::db::location_repo::LocationRow;
use crate::db::reference_repo::{self, ReferenceKind};
use crate::db::{analysis_repo, experiment_repo, run_config_repo, Database};
use crate::error::ResolveError;
use crate::monitor::filter::{experiment_name, relative_path, EntryFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Registered { run_config_id: i64, analysis_id: i64 },
    AlreadyRegistered(i64),
    /// Parsed fine but not marked ready yet.
    NotReady,
}

/// Registers the descriptor at `path` if it is new and ready.
///
/// The run configuration, its reference files and the analysis are created
/// in one transaction. Run configurations are immutable: a descriptor path
/// that is already registered is left alone.
pub fn ingest_descriptor(
    db: &Database,
    location: &LocationRow,
    path: &Path,
) -> Result<RegistrationOutcome, ResolveError> {
    let path_str = path.to_string_lossy().into_owned();

    if let Some(existing) = db.with_conn(|conn| run_config_repo::find_by_descriptor_path(conn, &path_str))? {
        debug!("Descriptor {} already registered as run config {}", path_str, existing.id);
        return Ok(RegistrationOutcome::AlreadyRegistered(existing.id));
    }

    let mut descriptor = Descriptor::load(path)?;
    if !descriptor.ready {
        debug!("Descriptor {} is not ready yet", path_str);
        return Ok(RegistrationOutcome::NotReady);
    }

    let relative = relative_path(location.root(), path).ok_or_else(|| ResolveError::OutsideLocation {
        path: path.to_path_buf(),
        root: location.root().to_path_buf(),
    })?;
    let experiment = experiment_name(&relative);
    let vendor = vendor_hint(&descriptor, location);
    let descriptor_dir = path.parent().unwrap_or(location.root()).to_path_buf();

    let prefix = descriptor
        .prefix
        .clone()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
    descriptor.prefix = Some(prefix.clone());

    let content = descriptor
        .to_json()
        .map_err(|e| ResolveError::Serialize(e.to_string()))?;
    let fasta = descriptor.list("fasta");
    let libraries = descriptor.list("lib");
    let explicit_files = descriptor.list("f");
    let total_files = descriptor
        .total_files
        .or_else(|| (!explicit_files.is_empty()).then_some(explicit_files.len() as u64))
        .map(|n| n as i64);
    let job_type = job_type_for(&descriptor);
    let name = format!("{}/{}-{}", experiment, descriptor_stem(path), prefix);

    let (run_config_id, analysis_id) = db.transaction(|conn| -> Result<(i64, i64), ResolveError> {
        let experiment_row = experiment_repo::get_or_create(conn, &experiment, &vendor)?;
        if let Some(total) = total_files {
            experiment_repo::set_sample_count(conn, experiment_row.id, total)?;
        }

        let run_config_id = run_config_repo::insert(
            conn,
            &run_config_repo::NewRunConfig {
                location_id: location.id,
                experiment_id: experiment_row.id,
                descriptor_path: &path_str,
                content: &content,
                prefix: &prefix,
                fasta_required: !fasta.is_empty(),
                library_required: !libraries.is_empty(),
            },
        )?;

        let references = fasta
            .iter()
            .map(|entry| (ReferenceKind::Fasta, entry))
            .chain(libraries.iter().map(|entry| (ReferenceKind::Library, entry)));
        for (kind, entry) in references {
            let reference_path = descriptor_dir.join(entry);
            let size = std::fs::metadata(&reference_path).map(|m| m.len() as i64).unwrap_or(0);
            reference_repo::insert(conn, run_config_id, kind, &reference_path.to_string_lossy(), size)?;
        }

        let analysis_id = analysis_repo::insert(
            conn,
            &analysis_repo::NewAnalysis {
                name: &name,
                experiment_id: experiment_row.id,
                run_config_id: Some(run_config_id),
                job_type: job_type.as_str(),
                total_files,
                keep_details: descriptor.keep_details,
            },
        )?;

        Ok((run_config_id, analysis_id))
    })?;

    info!(
        "Registered descriptor {} as run config {} (analysis '{}', {})",
        path_str, run_config_id, name, job_type
    );

    Ok(RegistrationOutcome::Registered {
        run_config_id,
        analysis_id,
    })
}

/// Vendor tag for an experiment first seen through its descriptor: the
/// extension of the first listed input file, else the location's first
/// recognized extension.
fn vendor_hint(descriptor: &Descriptor, location: &LocationRow) -> String {
    let filter = EntryFilter::from_location(location);
    descriptor
        .list("f")
        .first()
        .and_then(|name| filter.matching_extension(name).map(str::to_string))
        .or_else(|| location.extension_list().into_iter().next())
        .unwrap_or_else(|| ".raw".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::location_repo::{self, NewLocation};
    use tempfile::TempDir;

    fn setup() -> (TempDir, Database, LocationRow) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let root = dir.path().to_string_lossy().into_owned();
        let location = db
            .with_conn(|conn| location_repo::upsert(conn, &NewLocation::new(root)))
            .unwrap();
        std::fs::create_dir_all(dir.path().join("ExpA")).unwrap();
        (dir, db, location)
    }

    #[test]
    fn test_registers_ready_descriptor() {
        let (dir, db, location) = setup();
        std::fs::write(dir.path().join("ExpA/db.fasta"), ">P1\nMKT\n").unwrap();
        let path = dir.path().join("ExpA/search.cat.yml");
        std::fs::write(&path, "ready: true\nfasta: db.fasta\nf: [run1.raw, run2.raw]\n").unwrap();

        let outcome = ingest_descriptor(&db, &location, &path).unwrap();
        let RegistrationOutcome::Registered {
            run_config_id,
            analysis_id,
        } = outcome
        else {
            panic!("expected registration, got {:?}", outcome);
        };

        db.with_conn(|conn| {
            let config = run_config_repo::find_by_id(conn, run_config_id)?.unwrap();
            assert!(config.fasta_required);
            assert!(!config.library_required);
            assert_eq!(config.prefix.len(), 32);

            let stored = Descriptor::from_json(&config.content).unwrap();
            assert_eq!(stored.prefix.as_deref(), Some(config.prefix.as_str()));

            let refs = reference_repo::list_for_run_config(conn, run_config_id)?;
            assert_eq!(refs.len(), 1);
            assert_eq!(refs[0].size, 8);

            let analysis = analysis_repo::find_by_id(conn, analysis_id)?.unwrap();
            assert_eq!(analysis.job_type, "build_library");
            assert_eq!(analysis.total_files, Some(2));
            assert!(!analysis.processing && !analysis.completed);

            let experiment = experiment_repo::find_by_name(conn, "ExpA")?.unwrap();
            assert_eq!(experiment.vendor, ".raw");
            assert_eq!(experiment.sample_count, Some(2));
            Ok(())
        })
        .unwrap();

        assert_eq!(
            ingest_descriptor(&db, &location, &path).unwrap(),
            RegistrationOutcome::AlreadyRegistered(run_config_id)
        );
    }

    #[test]
    fn test_not_ready_descriptor_ignored() {
        let (dir, db, location) = setup();
        let path = dir.path().join("ExpA/draft.cat.yml");
        std::fs::write(&path, "ready: false\nlib: lib.tsv\n").unwrap();

        assert_eq!(
            ingest_descriptor(&db, &location, &path).unwrap(),
            RegistrationOutcome::NotReady
        );
        let found = db
            .with_conn(|conn| run_config_repo::find_by_descriptor_path(conn, &path.to_string_lossy()))
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_malformed_descriptor_rejected() {
        let (dir, db, location) = setup();
        let path = dir.path().join("ExpA/broken.cat.yml");
        std::fs::write(&path, "ready: [true\n").unwrap();

        assert!(matches!(
            ingest_descriptor(&db, &location, &path),
            Err(ResolveError::Parse { .. })
        ));
    }

    #[test]
    fn test_explicit_prefix_kept() {
        let (dir, db, location) = setup();
        let path = dir.path().join("ExpA/search.cat.yml");
        std::fs::write(&path, "ready: true\nprefix: run7\nlib: lib.tsv\n").unwrap();

        let RegistrationOutcome::Registered { run_config_id, .. } = ingest_descriptor(&db, &location, &path).unwrap()
        else {
            panic!("expected registration");
        };
        let config = db
            .with_conn(|conn| run_config_repo::find_by_id(conn, run_config_id))
            .unwrap()
            .unwrap();
        assert_eq!(config.prefix, "run7");
        assert!(config.library_required);
    }
}
