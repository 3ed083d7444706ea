//! Descriptor <-> engine argument list.
//!
//! Arguments are emitted in vocabulary order so the same descriptor always
//! produces the same command line. Decoding is the inverse for descriptors
//! whose path values are bare file names.

use std::path::Path;

use super::descriptor::{format_number, Descriptor, ParamValue};
use super::vocabulary::{flag, is_path_key, ParamKind, VOCABULARY};
use crate::error::ResolveError;

const UNIMOD_FLAG: &str = "--unimod";
const CHANNEL_SEPARATOR: &str = "; ";

/// Engine arguments for `descriptor`, without the program name.
pub fn encode_args(descriptor: &Descriptor) -> Vec<String> {
    let mut args = Vec::new();

    for (key, _) in VOCABULARY {
        let Some(value) = descriptor.get(key) else {
            continue;
        };
        let flag = flag(key);

        match value {
            ParamValue::Bool(true) => args.push(flag),
            ParamValue::Bool(false) => {}
            ParamValue::Number(n) => {
                args.push(flag);
                args.push(format_number(*n));
            }
            ParamValue::Str(s) => {
                args.push(flag);
                args.push(s.clone());
            }
            ParamValue::List(items) if items.is_empty() => {}
            ParamValue::List(items) => match *key {
                "unimod" => args.extend(items.iter().map(|item| format!("{}{}", UNIMOD_FLAG, item))),
                "channels" => {
                    args.push(flag);
                    args.push(items.join(CHANNEL_SEPARATOR));
                }
                _ => {
                    for item in items {
                        args.push(flag.clone());
                        args.push(item.clone());
                    }
                }
            },
        }
    }

    args
}

/// Full argv: engine program followed by the encoded arguments.
pub fn command_line(engine: &str, descriptor: &Descriptor) -> Vec<String> {
    let mut argv = Vec::with_capacity(1 + descriptor.params.len() * 2);
    argv.push(engine.to_string());
    argv.extend(encode_args(descriptor));
    argv
}

/// Rebuilds a descriptor from an argv whose first element is the engine.
/// Path-valued parameters keep only their file names.
pub fn decode_args(argv: &[String]) -> Result<Descriptor, ResolveError> {
    let (engine, args) = argv
        .split_first()
        .ok_or_else(|| ResolveError::Tokenize("empty command line".to_string()))?;

    let mut descriptor = Descriptor {
        engine_path: Some(engine.clone()),
        ..Default::default()
    };

    for (key, kind) in VOCABULARY {
        let flag = flag(key);
        let value = match kind {
            ParamKind::Bool => args.iter().any(|a| *a == flag).then_some(ParamValue::Bool(true)),
            ParamKind::List => {
                let items: Vec<String> = match *key {
                    "unimod" => args
                        .iter()
                        .filter_map(|a| a.strip_prefix(UNIMOD_FLAG))
                        .filter(|rest| !rest.is_empty())
                        .map(str::to_string)
                        .collect(),
                    "channels" => values_after(args, &flag)
                        .next()
                        .map(|joined| {
                            joined
                                .split(';')
                                .map(str::trim)
                                .filter(|s| !s.is_empty())
                                .map(str::to_string)
                                .collect()
                        })
                        .unwrap_or_default(),
                    _ => values_after(args, &flag).map(|v| strip_dir(key, v)).collect(),
                };
                (!items.is_empty()).then_some(ParamValue::List(items))
            }
            ParamKind::Number => values_after(args, &flag).next().map(|v| match v.parse::<f64>() {
                Ok(n) => ParamValue::Number(n),
                Err(_) => ParamValue::Str(v.to_string()),
            }),
            ParamKind::Str => values_after(args, &flag)
                .next()
                .map(|v| ParamValue::Str(strip_dir(key, v))),
        };

        if let Some(value) = value {
            descriptor.set(key, value);
        }
    }

    let files = descriptor.list("f");
    if !files.is_empty() {
        descriptor.total_files = Some(files.len() as u64);
    }

    Ok(descriptor)
}

/// Splits a shell-style command line into tokens. Backslashes are treated as
/// path separators, not escapes.
pub fn tokenize(line: &str) -> Result<Vec<String>, ResolveError> {
    let normalized = line.trim().replace('\\', "/");
    shlex::split(&normalized).ok_or_else(|| ResolveError::Tokenize(format!("unbalanced quotes in '{}'", line.trim())))
}

/// Values following each occurrence of `flag`. A following token that is
/// itself a flag does not count as a value.
fn values_after<'a>(args: &'a [String], flag: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    args.windows(2)
        .filter(move |pair| pair[0] == flag && !pair[1].starts_with("--"))
        .map(|pair| pair[1].as_str())
}

fn strip_dir(key: &str, value: &str) -> String {
    if !is_path_key(key) {
        return value.to_string();
    }
    Path::new(value)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn sample() -> Descriptor {
        let mut d = Descriptor::default();
        d.set("f", ParamValue::List(strings(&["a.raw", "b.raw"])));
        d.set("lib", ParamValue::List(strings(&["lib.tsv"])));
        d.set("qvalue", ParamValue::Number(0.01));
        d.set("threads", ParamValue::Number(8.0));
        d.set("matrices", ParamValue::Bool(true));
        d.set("reanalyse", ParamValue::Bool(false));
        d.set("unimod", ParamValue::List(strings(&["4", "35"])));
        d.set("channels", ParamValue::List(strings(&["mTRAQ,0,nK,0:0", "mTRAQ,4,nK,4.0070994:4.0070994"])));
        d.set("out", ParamValue::Str("report.tsv".to_string()));
        d
    }

    #[test]
    fn test_encode_flag_shapes() {
        let args = encode_args(&sample());
        let joined = args.join(" ");
        assert!(joined.contains("--f a.raw --f b.raw"));
        assert!(joined.contains("--qvalue 0.01"));
        assert!(joined.contains("--threads 8"));
        assert!(args.contains(&"--matrices".to_string()));
        assert!(!args.contains(&"--reanalyse".to_string()));
        assert!(args.contains(&"--unimod4".to_string()));
        assert!(args.contains(&"--unimod35".to_string()));
        assert!(args.contains(&"mTRAQ,0,nK,0:0; mTRAQ,4,nK,4.0070994:4.0070994".to_string()));
    }

    #[test]
    fn test_encode_is_deterministic_in_vocabulary_order() {
        let args = encode_args(&sample());
        let f = args.iter().position(|a| a == "--f").unwrap();
        let lib = args.iter().position(|a| a == "--lib").unwrap();
        let out = args.iter().position(|a| a == "--out").unwrap();
        assert!(f < lib && lib < out);
        assert_eq!(args, encode_args(&sample()));
    }

    #[test]
    fn test_underscore_keys_become_dashed_flags() {
        let mut d = Descriptor::default();
        d.set("gen_spec_lib", ParamValue::Bool(true));
        d.set("min_pr_mz", ParamValue::Number(300.0));
        assert_eq!(encode_args(&d), strings(&["--gen-spec-lib", "--min-pr-mz", "300"]));
    }

    #[test]
    fn test_decode_inverts_encode() {
        let d = sample();
        let argv = command_line("diann", &d);
        let back = decode_args(&argv).unwrap();
        assert_eq!(back.engine_path.as_deref(), Some("diann"));
        assert_eq!(back.total_files, Some(2));
        assert_eq!(back.effective_params(), d.effective_params());
    }

    #[test]
    fn test_decode_strips_directories_from_path_values() {
        let argv = strings(&[
            "/opt/diann/diann",
            "--f",
            "/data/ExpA/a.raw",
            "--fasta",
            "/data/ExpA/db.fasta",
            "--out",
            "/data/ExpA/run1/report.tsv",
            "--cut",
            "K*,R*",
        ]);
        let d = decode_args(&argv).unwrap();
        assert_eq!(d.list("f"), vec!["a.raw"]);
        assert_eq!(d.list("fasta"), vec!["db.fasta"]);
        assert_eq!(d.str_value("out"), Some("report.tsv"));
        assert_eq!(d.str_value("cut"), Some("K*,R*"));
    }

    #[test]
    fn test_decode_ignores_flag_as_value() {
        let argv = strings(&["diann", "--out", "--matrices"]);
        let d = decode_args(&argv).unwrap();
        assert!(d.get("out").is_none());
        assert_eq!(d.get("matrices"), Some(&ParamValue::Bool(true)));
    }

    #[test]
    fn test_decode_empty_argv() {
        assert!(matches!(decode_args(&[]), Err(ResolveError::Tokenize(_))));
    }

    #[test]
    fn test_tokenize_windows_paths_and_quotes() {
        let tokens = tokenize(r#"diann.exe --f C:\data\a.raw --channels "x; y" "#).unwrap();
        assert_eq!(tokens, strings(&["diann.exe", "--f", "C:/data/a.raw", "--channels", "x; y"]));
        assert!(tokenize("diann --out \"unterminated").is_err());
    }
}
