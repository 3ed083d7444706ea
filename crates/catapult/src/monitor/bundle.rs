//! Sizes of catalog entries on disk.

use std::io::ErrorKind;
use std::path::Path;

use walkdir::WalkDir;

use crate::error::MonitorError;

/// Recursive sum of regular file sizes under `path`.
pub fn bundle_size(path: &Path) -> Result<u64, MonitorError> {
    let mut total = 0u64;
    for entry in WalkDir::new(path) {
        let entry = entry.map_err(|e| MonitorError::Walk {
            path: path.to_path_buf(),
            source: e,
        })?;
        if entry.file_type().is_file() {
            let metadata = entry.metadata().map_err(|e| MonitorError::Walk {
                path: path.to_path_buf(),
                source: e,
            })?;
            total += metadata.len();
        }
    }
    Ok(total)
}

/// Current size of a catalog entry: the file length, or the recursive sum
/// for a bundle.
pub fn entry_size(path: &Path, bundle: bool) -> Result<u64, MonitorError> {
    if bundle {
        bundle_size(path)
    } else {
        std::fs::metadata(path)
            .map(|m| m.len())
            .map_err(|e| MonitorError::Stat {
                path: path.to_path_buf(),
                source: e,
            })
    }
}

/// True when the error only means the entry is gone (or not there yet).
pub fn is_missing(error: &MonitorError) -> bool {
    match error {
        MonitorError::Stat { source, .. } => source.kind() == ErrorKind::NotFound,
        MonitorError::Walk { source, .. } => source
            .io_error()
            .map(|e| e.kind() == ErrorKind::NotFound)
            .unwrap_or(false),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_bundle_size_sums_nested_files() {
        let dir = TempDir::new().unwrap();
        let bundle = dir.path().join("sample.d");
        std::fs::create_dir_all(bundle.join("sub")).unwrap();
        std::fs::write(bundle.join("analysis.tdf"), vec![0u8; 100]).unwrap();
        std::fs::write(bundle.join("sub/chunk.bin"), vec![0u8; 28]).unwrap();

        assert_eq!(bundle_size(&bundle).unwrap(), 128);
        assert_eq!(entry_size(&bundle, true).unwrap(), 128);
    }

    #[test]
    fn test_missing_entries() {
        let dir = TempDir::new().unwrap();
        let err = entry_size(&dir.path().join("gone.raw"), false).unwrap_err();
        assert!(is_missing(&err));
        let err = entry_size(&dir.path().join("gone.d"), true).unwrap_err();
        assert!(is_missing(&err));
    }
}
