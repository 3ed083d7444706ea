//! Resolving a run descriptor against concrete paths.
//!
//! Planning is pure: it decides which files go into the next invocation and
//! what the argv looks like. Creating the output folders is a separate step
//! so the scheduler only touches the disk once it has committed to a run.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::codec::command_line;
use super::descriptor::{Descriptor, ParamValue};
use crate::error::ResolveError;
use crate::jobs::JobType;

pub const DEFAULT_REPORT: &str = "report.tsv";
pub const DEFAULT_LIBRARY_REPORT: &str = "report-lib.tsv";
pub const DEFAULT_TEMP: &str = "temp";

/// A catalogued input file as seen by the planner.
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub id: i64,
    /// Path relative to the location root.
    pub path: String,
    pub ready: bool,
}

#[derive(Debug)]
pub struct PlanInput<'a> {
    pub descriptor: &'a Descriptor,
    pub location_root: &'a Path,
    /// Folder holding the descriptor file.
    pub descriptor_dir: &'a Path,
    /// Experiment name: descriptor folder relative to the location root.
    pub experiment: &'a str,
    pub prefix: &'a str,
    pub default_engine: &'a str,
    pub prerequisites_ready: bool,
    /// Declared number of input files, when known.
    pub declared_total: Option<u64>,
    pub files: &'a [CandidateFile],
    pub completed: &'a HashSet<i64>,
    pub claimed: &'a HashSet<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCommand {
    pub argv: Vec<String>,
    pub job_type: JobType,
    pub file_ids: Vec<i64>,
    pub output_folder: PathBuf,
    pub report_path: PathBuf,
    pub temp_folder: Option<PathBuf>,
}

impl ResolvedCommand {
    pub fn command_text(&self) -> String {
        shlex::try_join(self.argv.iter().map(String::as_str)).unwrap_or_else(|_| self.argv.join(" "))
    }

    /// Creates the output folder and, when configured, the temp folder.
    pub fn prepare_folders(&self) -> Result<(), ResolveError> {
        let folders = std::iter::once(&self.output_folder).chain(self.temp_folder.as_ref());
        for folder in folders {
            std::fs::create_dir_all(folder).map_err(|e| ResolveError::CreateFolder {
                path: folder.clone(),
                source: e,
            })?;
        }
        Ok(())
    }
}

/// Job type implied by a descriptor's reference inputs.
pub fn job_type_for(descriptor: &Descriptor) -> JobType {
    if descriptor.list("lib").is_empty() && !descriptor.list("fasta").is_empty() {
        JobType::BuildLibrary
    } else {
        JobType::LibrarySearch
    }
}

/// Plans the next invocation, or `None` when there is nothing to run yet.
pub fn plan(input: &PlanInput<'_>) -> Option<ResolvedCommand> {
    if !input.prerequisites_ready {
        debug!("Prerequisites not ready for prefix {}", input.prefix);
        return None;
    }

    let selected = select_files(input)?;
    if selected.is_empty() {
        return None;
    }

    if let Some(total) = input.declared_total {
        let available = input.completed.len() as u64 + selected.len() as u64;
        if available < total {
            debug!(
                "Waiting for input files for prefix {}: {} of {} available",
                input.prefix, available, total
            );
            return None;
        }
    }

    let descriptor = input.descriptor;
    let output_folder = input.descriptor_dir.join(input.prefix);
    let mut resolved = descriptor.clone();

    resolved.set(
        "f",
        ParamValue::List(
            selected
                .iter()
                .map(|file| path_string(&input.location_root.join(&file.path)))
                .collect(),
        ),
    );

    for key in ["fasta", "lib"] {
        let entries = descriptor.list(key);
        if !entries.is_empty() {
            let paths = entries
                .iter()
                .map(|entry| path_string(&input.descriptor_dir.join(entry)))
                .collect();
            resolved.set(key, ParamValue::List(paths));
        }
    }

    let job_type = job_type_for(descriptor);
    if job_type == JobType::BuildLibrary {
        resolved.set("gen_spec_lib", ParamValue::Bool(true));
        resolved.set(
            "out_lib",
            ParamValue::Str(path_string(&output_folder.join(DEFAULT_LIBRARY_REPORT))),
        );
    } else if let Some(out_lib) = descriptor.str_value("out_lib") {
        resolved.set(
            "out_lib",
            ParamValue::Str(path_string(&output_folder.join(basename_or(out_lib, DEFAULT_LIBRARY_REPORT)))),
        );
    }

    let report_path = output_folder.join(basename_or(descriptor.str_value("out").unwrap_or(""), DEFAULT_REPORT));
    resolved.set("out", ParamValue::Str(path_string(&report_path)));

    let temp_folder = descriptor.get("temp").map(|value| {
        let name = match value {
            ParamValue::Str(s) => basename_or(s, DEFAULT_TEMP),
            _ => DEFAULT_TEMP.to_string(),
        };
        output_folder.join(name)
    });
    if let Some(temp) = &temp_folder {
        resolved.set("temp", ParamValue::Str(path_string(temp)));
    }

    let engine = descriptor.engine_path.as_deref().unwrap_or(input.default_engine);

    Some(ResolvedCommand {
        argv: command_line(engine, &resolved),
        job_type,
        file_ids: selected.iter().map(|file| file.id).collect(),
        output_folder,
        report_path,
        temp_folder,
    })
}

/// Input files for the next run. `None` means an explicitly listed file is
/// not catalogued or not ready yet.
fn select_files<'a>(input: &'a PlanInput<'a>) -> Option<Vec<&'a CandidateFile>> {
    let pending = |file: &CandidateFile| !input.completed.contains(&file.id) && !input.claimed.contains(&file.id);
    let explicit = input.descriptor.list("f");

    if explicit.is_empty() || input.descriptor.file_auto {
        let mut files: Vec<_> = input.files.iter().filter(|&f| f.ready && pending(f)).collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        return Some(files);
    }

    let mut selected = Vec::with_capacity(explicit.len());
    for entry in &explicit {
        let relative = experiment_relative(input.experiment, entry);
        match input.files.iter().find(|f| f.path == relative) {
            Some(file) if file.ready => {
                if pending(file) {
                    selected.push(file);
                }
            }
            Some(_) => {
                debug!("Listed file {} is not ready yet", relative);
                return None;
            }
            None => {
                debug!("Listed file {} is not catalogued yet", relative);
                return None;
            }
        }
    }
    Some(selected)
}

/// Catalog path for a descriptor `f` entry.
pub fn experiment_relative(experiment: &str, entry: &str) -> String {
    let entry = entry.replace('\\', "/");
    let entry = entry.trim_start_matches("./");
    if experiment.is_empty() || experiment == "." {
        entry.to_string()
    } else {
        format!("{}/{}", experiment.trim_end_matches('/'), entry)
    }
}

fn basename_or(value: &str, default: &str) -> String {
    Path::new(value)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| default.to_string())
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
