pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod ingest;
pub mod jobs;
pub mod logging;
pub mod monitor;
pub mod readiness;
pub mod resolver;
pub mod worker;

pub use broadcast::{LogBroadcaster, MonitorEventBroadcaster, TaskEventBroadcaster};
pub use config::{load_settings, Settings};
pub use db::Database;
pub use error::{
    CatapultError, ConfigError, ExecutionError, IngestError, JobError, MonitorError, ResolveError, Result,
    WorkerError,
};
pub use jobs::Scheduler;
pub use monitor::{LocationHandler, LocationMonitor};
pub use readiness::ReadinessDetector;
pub use resolver::Descriptor;
pub use tokio_util::sync::CancellationToken;
pub use worker::{Coordinator, WorkerIdentity, WorkerRunner};
