//! Recovering a descriptor from an engine log file.
//!
//! The engine echoes its full command line as the seventh line of every log.

use std::path::Path;

use tracing::info;

use super::codec::{decode_args, tokenize};
use super::descriptor::Descriptor;
use crate::error::ResolveError;

pub const COMMAND_LINE_INDEX: usize = 6;

pub fn read_command_line(log_path: &Path) -> Result<String, ResolveError> {
    let content = std::fs::read_to_string(log_path).map_err(|e| ResolveError::Read {
        path: log_path.to_path_buf(),
        source: e,
    })?;

    content
        .lines()
        .nth(COMMAND_LINE_INDEX)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ResolveError::MissingCommandLine {
            path: log_path.to_path_buf(),
            line: COMMAND_LINE_INDEX + 1,
        })
}

/// Descriptor reconstructed from the command line in `log_path`. The
/// result is marked ready and carries one `f` entry per input file.
pub fn descriptor_from_log(log_path: &Path) -> Result<Descriptor, ResolveError> {
    let line = read_command_line(log_path)?;
    let argv = tokenize(&line)?;
    let mut descriptor = decode_args(&argv)?;
    descriptor.ready = true;
    Ok(descriptor)
}

/// Writes the full descriptor template for `descriptor` to `output`.
pub fn write_descriptor(descriptor: &Descriptor, output: &Path) -> Result<(), ResolveError> {
    let yaml = descriptor.to_yaml(true)?;
    std::fs::write(output, yaml).map_err(|e| ResolveError::Write {
        path: output.to_path_buf(),
        source: e,
    })?;
    info!("Wrote descriptor to {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ParamValue;
    use tempfile::TempDir;

    const LOG: &str = "DIA-NN 1.8.1 (Data-Independent Acquisition by Neural Networks)\n\
Compiled on Apr 14 2022 15:31:19\n\
Current date and time: Tue Mar 12 10:00:00 2024\n\
CPU: GenuineIntel Intel(R) Xeon(R)\n\
SIMD instructions: AVX AVX2 FMA SSE4.1 SSE4.2\n\
Logical CPU cores: 32\n\
C:\\DIA-NN\\1.8.1\\DiaNN.exe --f D:\\ExpA\\s1.raw --f D:\\ExpA\\s2.raw --lib  --threads 16 --verbose 1 --out D:\\ExpA\\out\\report.tsv --qvalue 0.01 --matrices --fasta D:\\ExpA\\human.fasta --unimod4 --met-excision\n\
\n\
Thread number set to 16\n";

    #[test]
    fn test_descriptor_from_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.log.txt");
        std::fs::write(&path, LOG).unwrap();

        let d = descriptor_from_log(&path).unwrap();
        assert!(d.ready);
        assert_eq!(d.engine_path.as_deref(), Some("C:/DIA-NN/1.8.1/DiaNN.exe"));
        assert_eq!(d.list("f"), vec!["s1.raw", "s2.raw"]);
        assert_eq!(d.total_files, Some(2));
        assert_eq!(d.list("fasta"), vec!["human.fasta"]);
        assert!(d.get("lib").is_none());
        assert_eq!(d.get("threads"), Some(&ParamValue::Number(16.0)));
        assert_eq!(d.str_value("out"), Some("report.tsv"));
        assert_eq!(d.list("unimod"), vec!["4"]);
        assert_eq!(d.get("met_excision"), Some(&ParamValue::Bool(true)));
    }

    #[test]
    fn test_short_log_has_no_command_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.log.txt");
        std::fs::write(&path, "line 1\nline 2\n").unwrap();

        assert!(matches!(
            descriptor_from_log(&path),
            Err(ResolveError::MissingCommandLine { line: 7, .. })
        ));
    }

    #[test]
    fn test_written_descriptor_parses_back() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("report.log.txt");
        std::fs::write(&log, LOG).unwrap();
        let out = dir.path().join("replay.cat.yml");

        let d = descriptor_from_log(&log).unwrap();
        write_descriptor(&d, &out).unwrap();
        let back = Descriptor::load(&out).unwrap();
        assert_eq!(back.effective_params(), d.effective_params());
        assert_eq!(back.total_files, Some(2));
        assert!(back.ready);
    }
}
