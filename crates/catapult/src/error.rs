use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatapultError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Monitor error: {0}")]
    Monitor(#[from] MonitorError),

    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Watch location '{0}' does not exist")]
    MissingRoot(PathBuf),

    #[error("Failed to watch '{path}': {reason}")]
    Watch { path: PathBuf, reason: String },

    #[error("Failed to stat '{path}': {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Directory walk failed under '{path}': {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Path '{path}' is outside watch location '{root}'")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error(transparent)]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Failed to read descriptor '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse descriptor '{path}': {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Invalid value for '{key}': expected {expected}")]
    InvalidValue { key: String, expected: &'static str },

    #[error("Failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Engine log '{path}' has no command line at line {line}")]
    MissingCommandLine { path: PathBuf, line: usize },

    #[error("Failed to tokenize command line: {0}")]
    Tokenize(String),

    #[error("Descriptor '{path}' is outside watch location '{root}'")]
    OutsideLocation { path: PathBuf, root: PathBuf },

    #[error("Failed to create output folder '{path}': {source}")]
    CreateFolder {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize descriptor: {0}")]
    Serialize(String),

    #[error(transparent)]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Invalid {entity} transition from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Analysis {analysis_id} still has {outstanding} claimed file(s) not completed")]
    ClaimedFilesOutstanding { analysis_id: i64, outstanding: u64 },

    #[error("Analysis {0} not found")]
    AnalysisNotFound(i64),

    #[error("Task '{0}' not found")]
    TaskNotFound(String),

    #[error("Unknown status '{0}'")]
    UnknownStatus(String),

    #[error("Unknown job type '{0}'")]
    UnknownJobType(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker registration failed: {0}")]
    Registration(String),

    #[error("Blocking task panicked: {0}")]
    Join(String),

    #[error("Malformed task parameters for '{task_id}': {reason}")]
    Params { task_id: String, reason: String },

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Database(#[from] crate::db::DatabaseError),
}

impl WorkerError {
    /// Catalog failures the worker can wait out, such as a lock held past
    /// the busy timeout.
    pub fn is_transient(&self) -> bool {
        match self {
            WorkerError::Database(e) | WorkerError::Job(JobError::Database(e)) => {
                !matches!(e, crate::db::DatabaseError::LockPoisoned)
            }
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Empty command line")]
    EmptyCommand,

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed while waiting for '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Report '{0}' not found")]
    MissingReport(PathBuf),

    #[error("Failed to read report '{path}': {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Report '{path}' is missing column '{column}'")]
    MissingColumn { path: PathBuf, column: String },

    #[error("Report '{path}' has an invalid value in column '{column}': '{value}'")]
    InvalidValue {
        path: PathBuf,
        column: String,
        value: String,
    },

    #[error(transparent)]
    Database(#[from] crate::db::DatabaseError),
}

pub type Result<T> = std::result::Result<T, CatapultError>;
