use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Process settings shared by every `catapult` subcommand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: String,
    /// Catalog location; `~/.catapult/data/catapult.db` when unset.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub detector: DetectorSettings,
    #[serde(default)]
    pub worker: WorkerSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            database_path: None,
            engine: EngineSettings::default(),
            monitor: MonitorSettings::default(),
            detector: DetectorSettings::default(),
            worker: WorkerSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Settings {
    /// Resolved catalog path with `~` expanded.
    pub fn database_path(&self) -> Option<PathBuf> {
        match &self.database_path {
            Some(path) => Some(expand_tilde(path)),
            None => crate::db::default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Engine executable used when a descriptor names none.
    #[serde(default = "default_engine_path")]
    pub path: String,
}

fn default_engine_path() -> String {
    "diann".to_string()
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            path: default_engine_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    /// Poll interval for network locations.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval() -> u64 {
    1
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorSettings {
    #[serde(default = "default_detector_interval")]
    pub interval_secs: u64,
    /// How long a file must stay unchanged before it may become ready.
    #[serde(default = "default_threshold")]
    pub threshold_secs: u64,
    /// Running tasks older than this with a silent worker are reported.
    #[serde(default = "default_stall_threshold")]
    pub stall_threshold_secs: u64,
}

fn default_detector_interval() -> u64 {
    10
}

fn default_threshold() -> u64 {
    300
}

fn default_stall_threshold() -> u64 {
    86_400
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_detector_interval(),
            threshold_secs: default_threshold(),
            stall_threshold_secs: default_stall_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    /// Queues this worker serves; `*` serves all.
    #[serde(default = "default_queues")]
    pub queues: Vec<String>,
    #[serde(default = "default_worker_interval")]
    pub interval_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
    #[serde(default)]
    pub logfile: Option<String>,
}

fn default_queues() -> Vec<String> {
    vec!["default".to_string()]
}

fn default_worker_interval() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    300
}

fn default_heartbeat() -> u64 {
    30
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            name: None,
            hostname: None,
            queues: default_queues(),
            interval_ms: default_worker_interval(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
            heartbeat_secs: default_heartbeat(),
            logfile: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}
