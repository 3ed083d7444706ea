//! Readers for the engine's tab-separated report files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord};

use crate::db::result_repo::{PrecursorDetail, ProteinGroupDetail};
use crate::error::IngestError;

pub const STATS_SUFFIX: &str = "stats";
pub const PRECURSOR_MATRIX_SUFFIX: &str = "pr_matrix";
pub const PROTEIN_GROUP_MATRIX_SUFFIX: &str = "pg_matrix";

/// `<dir>/report.tsv` with suffix `stats` gives `<dir>/report.stats.tsv`.
pub fn sibling(report_path: &Path, suffix: &str, extension: &str) -> PathBuf {
    let name = report_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.strip_suffix(".tsv").unwrap_or(&name);
    report_path.with_file_name(format!("{stem}.{suffix}.{extension}"))
}

/// One row of the per-run statistics report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsRow {
    pub file_name: String,
    pub proteins: i64,
    pub precursors: i64,
}

struct Table {
    path: PathBuf,
    columns: HashMap<String, usize>,
    records: Vec<StringRecord>,
}

impl Table {
    fn read(path: &Path) -> Result<Self, IngestError> {
        if !path.exists() {
            return Err(IngestError::MissingReport(path.to_path_buf()));
        }
        let csv_error = |source| IngestError::Csv {
            path: path.to_path_buf(),
            source,
        };

        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .from_path(path)
            .map_err(csv_error)?;
        let columns = reader
            .headers()
            .map_err(csv_error)?
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), i))
            .collect();
        let records = reader
            .records()
            .collect::<Result<Vec<_>, _>>()
            .map_err(csv_error)?;

        Ok(Self {
            path: path.to_path_buf(),
            columns,
            records,
        })
    }

    fn column(&self, name: &str) -> Result<usize, IngestError> {
        self.columns
            .get(name)
            .copied()
            .ok_or_else(|| IngestError::MissingColumn {
                path: self.path.clone(),
                column: name.to_string(),
            })
    }

    fn invalid(&self, column: &str, value: &str) -> IngestError {
        IngestError::InvalidValue {
            path: self.path.clone(),
            column: column.to_string(),
            value: value.to_string(),
        }
    }
}

fn field(record: &StringRecord, index: usize) -> &str {
    record.get(index).unwrap_or("").trim()
}

fn parse_count(table: &Table, column: &str, raw: &str) -> Result<i64, IngestError> {
    raw.parse::<i64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().filter(|v| v.fract() == 0.0).map(|v| v as i64))
        .ok_or_else(|| table.invalid(column, raw))
}

/// Empty cells and `NA` mean the entry was not quantified in that run.
fn parse_intensity(table: &Table, column: &str, raw: &str) -> Result<Option<f64>, IngestError> {
    if raw.is_empty() || raw.eq_ignore_ascii_case("na") || raw.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    raw.parse::<f64>()
        .map(Some)
        .map_err(|_| table.invalid(column, raw))
}

fn optional(raw: &str) -> Option<String> {
    (!raw.is_empty()).then(|| raw.to_string())
}

pub fn read_stats(path: &Path) -> Result<Vec<StatsRow>, IngestError> {
    let table = Table::read(path)?;
    let name = table.column("File.Name")?;
    let proteins = table.column("Proteins.Identified")?;
    let precursors = table.column("Precursors.Identified")?;

    table
        .records
        .iter()
        .filter(|r| !field(r, name).is_empty())
        .map(|r| {
            Ok(StatsRow {
                file_name: field(r, name).to_string(),
                proteins: parse_count(&table, "Proteins.Identified", field(r, proteins))?,
                precursors: parse_count(&table, "Precursors.Identified", field(r, precursors))?,
            })
        })
        .collect()
}

/// A quantity matrix with one intensity column per run, keyed by the run's
/// `File.Name`.
pub struct MatrixReport {
    table: Table,
}

impl MatrixReport {
    pub fn read(path: &Path) -> Result<Self, IngestError> {
        Ok(Self {
            table: Table::read(path)?,
        })
    }

    pub fn has_run(&self, file_name: &str) -> bool {
        self.table.columns.contains_key(file_name)
    }

    pub fn precursors_for(&self, file_name: &str) -> Result<Vec<PrecursorDetail>, IngestError> {
        let table = &self.table;
        let intensity = table.column(file_name)?;
        let group = table.column("Protein.Group")?;
        let genes = table.column("Genes")?;
        let proteotypic = table.column("Proteotypic")?;
        let precursor = table.column("Precursor.Id")?;

        let mut rows = Vec::new();
        for record in &table.records {
            let Some(value) = parse_intensity(table, file_name, field(record, intensity))? else {
                continue;
            };
            rows.push(PrecursorDetail {
                precursor_id: field(record, precursor).to_string(),
                protein_group: field(record, group).to_string(),
                gene_names: optional(field(record, genes)),
                proteotypic: matches!(field(record, proteotypic), "1" | "1.0" | "TRUE" | "true"),
                intensity: value,
            });
        }
        Ok(rows)
    }

    pub fn protein_groups_for(&self, file_name: &str) -> Result<Vec<ProteinGroupDetail>, IngestError> {
        let table = &self.table;
        let intensity = table.column(file_name)?;
        let group = table.column("Protein.Group")?;
        let genes = table.column("Genes")?;

        let mut rows = Vec::new();
        for record in &table.records {
            let Some(value) = parse_intensity(table, file_name, field(record, intensity))? else {
                continue;
            };
            rows.push(ProteinGroupDetail {
                protein_group: field(record, group).to_string(),
                gene_names: optional(field(record, genes)),
                intensity: value,
            });
        }
        Ok(rows)
    }
}
