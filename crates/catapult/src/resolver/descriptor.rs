//! Run descriptors: the `*.cat.yml` files users drop next to their data.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::warn;

use super::vocabulary::{kind_of, ParamKind, VOCABULARY};
use crate::error::ResolveError;

pub const DESCRIPTOR_SUFFIXES: &[&str] = &[".cat.yml", ".cat.yaml"];

/// One engine parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(f64),
    Str(String),
    List(Vec<String>),
}

impl ParamValue {
    /// False for values that emit nothing: `false` flags and empty lists.
    pub fn is_set(&self) -> bool {
        match self {
            ParamValue::Bool(b) => *b,
            ParamValue::List(items) => !items.is_empty(),
            ParamValue::Number(_) | ParamValue::Str(_) => true,
        }
    }
}

/// A parsed descriptor: engine parameters plus the control keys that steer
/// scheduling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub engine_path: Option<String>,
    #[serde(default)]
    pub total_files: Option<u64>,
    #[serde(default)]
    pub keep_details: bool,
    #[serde(default)]
    pub file_auto: bool,
}

impl Descriptor {
    pub fn load(path: &Path) -> Result<Self, ResolveError> {
        let content = std::fs::read_to_string(path).map_err(|e| ResolveError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_yaml_str(&content, path)
    }

    /// Parses descriptor YAML. `origin` is only used in error messages.
    pub fn from_yaml_str(content: &str, origin: &Path) -> Result<Self, ResolveError> {
        let parse_error = |reason: String| ResolveError::Parse {
            path: origin.to_path_buf(),
            reason,
        };

        let value: Value = serde_yaml::from_str(content).map_err(|e| parse_error(e.to_string()))?;
        let mapping = match value {
            Value::Mapping(mapping) => mapping,
            Value::Null => return Err(parse_error("descriptor is empty".to_string())),
            _ => return Err(parse_error("descriptor must be a mapping".to_string())),
        };

        let mut descriptor = Descriptor::default();
        for (key, value) in mapping {
            let key = match key {
                Value::String(key) => key,
                other => return Err(parse_error(format!("non-string key {:?}", other))),
            };

            match key.as_str() {
                "ready" | "cat_ready" => descriptor.ready = bool_value(&key, &value)?,
                "prefix" => descriptor.prefix = scalar_string(&key, &value)?,
                "engine_path" | "diann_path" => descriptor.engine_path = scalar_string(&key, &value)?,
                "total_files" | "cat_total_files" => {
                    descriptor.total_files = match &value {
                        Value::Null => None,
                        Value::Number(n) => Some(n.as_u64().ok_or(ResolveError::InvalidValue {
                            key: key.clone(),
                            expected: "a non-negative integer",
                        })?),
                        _ => {
                            return Err(ResolveError::InvalidValue {
                                key,
                                expected: "a non-negative integer",
                            })
                        }
                    }
                }
                "keep_details" => descriptor.keep_details = bool_value(&key, &value)?,
                "file_auto" | "cat_file_auto" => descriptor.file_auto = bool_value(&key, &value)?,
                _ => match kind_of(&key) {
                    Some(kind) => {
                        if let Some(param) = param_value(&key, kind, &value)? {
                            descriptor.params.insert(key, param);
                        }
                    }
                    None => warn!("Ignoring unknown descriptor key '{}'", key),
                },
            }
        }

        Ok(descriptor)
    }

    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.params.get(key)
    }

    /// List entries for `key`; a lone string counts as a one-element list.
    pub fn list(&self, key: &str) -> Vec<String> {
        match self.params.get(key) {
            Some(ParamValue::List(items)) => items.clone(),
            Some(ParamValue::Str(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    pub fn str_value(&self, key: &str) -> Option<&str> {
        match self.params.get(key) {
            Some(ParamValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn set(&mut self, key: &str, value: ParamValue) {
        self.params.insert(key.to_string(), value);
    }

    /// Parameters that affect the emitted command line.
    pub fn effective_params(&self) -> BTreeMap<String, ParamValue> {
        self.params
            .iter()
            .filter(|(_, v)| v.is_set())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Renders the descriptor as YAML. With `full`, every vocabulary key is
    /// written (unset ones as null, false or `[]`) so the file doubles as a
    /// template.
    pub fn to_yaml(&self, full: bool) -> Result<String, ResolveError> {
        let mut mapping = Mapping::new();
        mapping.insert("ready".into(), Value::Bool(self.ready));
        mapping.insert("prefix".into(), opt_string(&self.prefix));
        mapping.insert("engine_path".into(), opt_string(&self.engine_path));
        mapping.insert(
            "total_files".into(),
            self.total_files.map(Value::from).unwrap_or(Value::Null),
        );
        mapping.insert("keep_details".into(), Value::Bool(self.keep_details));
        mapping.insert("file_auto".into(), Value::Bool(self.file_auto));

        for (key, kind) in VOCABULARY {
            let value = match self.params.get(*key) {
                Some(ParamValue::Bool(b)) => Value::Bool(*b),
                Some(ParamValue::Number(n)) => number_value(*n),
                Some(ParamValue::Str(s)) => Value::String(s.clone()),
                Some(ParamValue::List(items)) => {
                    Value::Sequence(items.iter().cloned().map(Value::String).collect())
                }
                None if full => match kind {
                    ParamKind::Bool => Value::Bool(false),
                    ParamKind::List => Value::Sequence(Vec::new()),
                    ParamKind::Str | ParamKind::Number => Value::Null,
                },
                None => continue,
            };
            mapping.insert(Value::String(key.to_string()), value);
        }

        serde_yaml::to_string(&Value::Mapping(mapping)).map_err(|e| ResolveError::Serialize(e.to_string()))
    }
}

pub fn is_descriptor_path(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|name| DESCRIPTOR_SUFFIXES.iter().any(|s| name.ends_with(s)))
        .unwrap_or(false)
}

/// File name without the descriptor suffix: `run.cat.yml` -> `run`.
pub fn descriptor_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    DESCRIPTOR_SUFFIXES
        .iter()
        .find_map(|s| name.strip_suffix(s).map(str::to_string))
        .unwrap_or(name)
}

/// Formats a number without a trailing `.0`.
pub fn format_number(n: f64) -> String {
    n.to_string()
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

fn opt_string(value: &Option<String>) -> Value {
    value.clone().map(Value::String).unwrap_or(Value::Null)
}

fn bool_value(key: &str, value: &Value) -> Result<bool, ResolveError> {
    match value {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(*b),
        _ => Err(ResolveError::InvalidValue {
            key: key.to_string(),
            expected: ParamKind::Bool.describe(),
        }),
    }
}

fn scalar_string(key: &str, value: &Value) -> Result<Option<String>, ResolveError> {
    match value {
        Value::Null => Ok(None),
        other => scalar_to_string(other).map(Some).ok_or(ResolveError::InvalidValue {
            key: key.to_string(),
            expected: ParamKind::Str.describe(),
        }),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(match n.as_i64() {
            Some(i) => i.to_string(),
            None => format_number(n.as_f64()?),
        }),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn param_value(key: &str, kind: ParamKind, value: &Value) -> Result<Option<ParamValue>, ResolveError> {
    let invalid = || ResolveError::InvalidValue {
        key: key.to_string(),
        expected: kind.describe(),
    };

    if value.is_null() {
        return Ok(None);
    }

    let param = match kind {
        ParamKind::Bool => ParamValue::Bool(value.as_bool().ok_or_else(invalid)?),
        ParamKind::Number => match value {
            Value::Number(n) => ParamValue::Number(n.as_f64().ok_or_else(invalid)?),
            Value::String(s) => ParamValue::Number(s.trim().parse().map_err(|_| invalid())?),
            _ => return Err(invalid()),
        },
        ParamKind::Str => match value {
            Value::String(_) | Value::Number(_) => {
                ParamValue::Str(scalar_to_string(value).ok_or_else(invalid)?)
            }
            _ => return Err(invalid()),
        },
        ParamKind::List => match value {
            Value::Sequence(items) => ParamValue::List(
                items
                    .iter()
                    .map(|item| scalar_to_string(item).ok_or_else(invalid))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            scalar => ParamValue::List(vec![scalar_to_string(scalar).ok_or_else(invalid)?]),
        },
    };
    Ok(Some(param))
}
