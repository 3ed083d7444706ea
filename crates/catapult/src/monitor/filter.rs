//! Deciding what a filesystem path means to the catalog.

use std::path::{Component, Path};

use crate::db::location_repo::LocationRow;
use crate::resolver::is_descriptor_path;

/// Acquisition directories with this suffix are one logical file.
pub const BUNDLE_SUFFIX: &str = ".d";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// A run descriptor.
    Descriptor,
    /// Instrument output. `logical` is the catalog path: the entry itself,
    /// or the enclosing bundle directory when the entry lives inside one.
    Raw {
        logical: String,
        vendor: String,
        bundle: bool,
    },
    Ignored,
}

/// Extension and ignore-term filter for one watch location.
#[derive(Debug, Clone)]
pub struct EntryFilter {
    extensions: Vec<String>,
    ignore_term: String,
}

impl EntryFilter {
    pub fn new(extensions: Vec<String>, ignore_term: impl Into<String>) -> Self {
        Self {
            extensions,
            ignore_term: ignore_term.into(),
        }
    }

    pub fn from_location(location: &LocationRow) -> Self {
        Self::new(location.extension_list(), location.ignore_term.clone())
    }

    pub fn is_ignored(&self, relative: &str) -> bool {
        !self.ignore_term.is_empty() && relative.contains(&self.ignore_term)
    }

    /// The configured extension `name` ends with, compared case-insensitively.
    pub fn matching_extension(&self, name: &str) -> Option<&str> {
        let lower = name.to_ascii_lowercase();
        self.extensions
            .iter()
            .find(|ext| lower.ends_with(&ext.to_ascii_lowercase()) && lower.len() > ext.len())
            .map(String::as_str)
    }

    fn bundles_enabled(&self) -> Option<&str> {
        self.extensions
            .iter()
            .find(|ext| ext.eq_ignore_ascii_case(BUNDLE_SUFFIX))
            .map(String::as_str)
    }

    /// Classifies a `/`-separated path relative to the location root.
    pub fn classify(&self, relative: &str) -> EntryKind {
        if relative.is_empty() || self.is_ignored(relative) {
            return EntryKind::Ignored;
        }

        if let Some(bundle_ext) = self.bundles_enabled() {
            let mut logical = String::new();
            for segment in relative.split('/') {
                if !logical.is_empty() {
                    logical.push('/');
                }
                logical.push_str(segment);
                if segment.len() > BUNDLE_SUFFIX.len() && segment.to_ascii_lowercase().ends_with(BUNDLE_SUFFIX) {
                    return EntryKind::Raw {
                        logical,
                        vendor: bundle_ext.to_string(),
                        bundle: true,
                    };
                }
            }
        }

        if is_descriptor_path(Path::new(relative)) {
            return EntryKind::Descriptor;
        }

        let name = relative.rsplit('/').next().unwrap_or(relative);
        match self.matching_extension(name) {
            Some(ext) if !ext.eq_ignore_ascii_case(BUNDLE_SUFFIX) => EntryKind::Raw {
                logical: relative.to_string(),
                vendor: ext.to_string(),
                bundle: false,
            },
            _ => EntryKind::Ignored,
        }
    }
}

/// `/`-separated path of `path` relative to `root`, or `None` when `path`
/// is not strictly below `root`.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let stripped = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = stripped
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Experiment name for a catalog path: its parent directory, or `.` at the
/// location root.
pub fn experiment_name(logical: &str) -> String {
    match logical.rsplit_once('/') {
        Some((parent, _)) if !parent.is_empty() => parent.to_string(),
        _ => ".".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::location_repo::{parse_extensions, DEFAULT_EXTENSIONS, DEFAULT_IGNORE_TERM};

    fn filter() -> EntryFilter {
        EntryFilter::new(parse_extensions(DEFAULT_EXTENSIONS), DEFAULT_IGNORE_TERM)
    }

    #[test]
    fn test_plain_raw_file() {
        assert_eq!(
            filter().classify("ExpA/run1.raw"),
            EntryKind::Raw {
                logical: "ExpA/run1.raw".to_string(),
                vendor: ".raw".to_string(),
                bundle: false,
            }
        );
        assert!(matches!(filter().classify("ExpA/run1.MZML"), EntryKind::Raw { .. }));
    }

    #[test]
    fn test_bundle_members_map_to_bundle() {
        let expected = EntryKind::Raw {
            logical: "ExpB/sample.d".to_string(),
            vendor: ".d".to_string(),
            bundle: true,
        };
        assert_eq!(filter().classify("ExpB/sample.d"), expected);
        assert_eq!(filter().classify("ExpB/sample.d/analysis.tdf"), expected);
        assert_eq!(filter().classify("ExpB/sample.d/sub/x.bin"), expected);
    }

    #[test]
    fn test_ignored_entries() {
        let f = filter();
        assert_eq!(f.classify("ExpA/DONOTPROCESS/run1.raw"), EntryKind::Ignored);
        assert_eq!(f.classify("ExpA/notes.txt"), EntryKind::Ignored);
        assert_eq!(f.classify("ExpA"), EntryKind::Ignored);
        assert_eq!(f.classify(".raw"), EntryKind::Ignored);
    }

    #[test]
    fn test_descriptors() {
        assert_eq!(filter().classify("ExpA/search.cat.yml"), EntryKind::Descriptor);
        assert_eq!(filter().classify("ExpA/DONOTPROCESS.cat.yml"), EntryKind::Ignored);
    }

    #[test]
    fn test_bundles_disabled_without_extension() {
        let f = EntryFilter::new(vec![".raw".to_string()], "");
        assert_eq!(f.classify("ExpB/sample.d/analysis.tdf"), EntryKind::Ignored);
    }

    #[test]
    fn test_relative_path_and_experiment() {
        let root = Path::new("/data");
        assert_eq!(relative_path(root, Path::new("/data/ExpA/run1.raw")).as_deref(), Some("ExpA/run1.raw"));
        assert_eq!(relative_path(root, Path::new("/data")), None);
        assert_eq!(relative_path(root, Path::new("/other/run1.raw")), None);

        assert_eq!(experiment_name("ExpA/run1.raw"), "ExpA");
        assert_eq!(experiment_name("ExpA/sub/b.d"), "ExpA/sub");
        assert_eq!(experiment_name("run1.raw"), ".");
    }
}
