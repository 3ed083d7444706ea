//! Isolated watch location and catalog for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;

use catapult::db::location_repo::{self, LocationRow, NewLocation};
use catapult::db::Database;
use catapult::{LocationHandler, MonitorEventBroadcaster, ReadinessDetector, Scheduler, TaskEventBroadcaster};

/// Engine stand-in: writes a stats table naming every `--f` input next to
/// the `--out` report, then prints a line.
const FAKE_ENGINE: &str = r#"#!/bin/sh
out=""
files=""
while [ "$#" -gt 0 ]; do
  case "$1" in
    --f) files="$files $2"; shift 2 ;;
    --out) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
stats="${out%.tsv}.stats.tsv"
printf 'File.Name\tProteins.Identified\tPrecursors.Identified\n' > "$stats"
for f in $files; do
  printf '%s\t100\t1000\n' "$f" >> "$stats"
done
echo "processed"
"#;

pub struct TestHarness {
    temp_dir: TempDir,
    /// Root of the watch location.
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub db: Database,
    pub location: LocationRow,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = std::fs::canonicalize(temp_dir.path()).expect("Failed to resolve temp directory");

        let data_dir = base.join("data");
        std::fs::create_dir_all(&data_dir).expect("Failed to create data dir");

        let db_path = base.join("catapult.db");
        let db = Database::open(&db_path).expect("Failed to open catalog");
        let root = data_dir.to_string_lossy().into_owned();
        let location = db
            .with_conn(|conn| location_repo::upsert(conn, &NewLocation::new(root)))
            .expect("Failed to add location");

        Self {
            temp_dir,
            data_dir,
            db_path,
            db,
            location,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// A separate connection to the same catalog file.
    pub fn second_handle(&self) -> Database {
        Database::open(&self.db_path).expect("Failed to open second handle")
    }

    /// Write a file under the watch location, creating parent folders.
    pub fn write_file(&self, relative: &str, content: &[u8]) -> PathBuf {
        let path = self.data_dir.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        std::fs::write(&path, content).expect("Failed to write file");
        path
    }

    pub fn write_descriptor(&self, relative: &str, yaml: &str) -> PathBuf {
        self.write_file(relative, yaml.as_bytes())
    }

    pub fn handler(&self) -> LocationHandler {
        LocationHandler::new(self.db.clone(), self.location.clone(), MonitorEventBroadcaster::default())
    }

    pub fn detector(&self, threshold: Duration) -> ReadinessDetector {
        ReadinessDetector::new(self.db.clone(), threshold)
    }

    pub fn scheduler(&self, default_engine: &str) -> Scheduler {
        Scheduler::new(self.db.clone(), TaskEventBroadcaster::default(), default_engine)
    }

    /// Installs the shell engine stand-in outside the watch location.
    #[cfg(unix)]
    pub fn fake_engine(&self) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = self.temp_dir.path().join("fake-engine.sh");
        std::fs::write(&path, FAKE_ENGINE).expect("Failed to write engine script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("Failed to mark engine executable");
        path
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
