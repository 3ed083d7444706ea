//! Worker processes: each registers itself, claims tasks from the shared
//! catalog and runs them one at a time.

pub mod coordinator;
pub mod identity;
pub mod runner;

pub use coordinator::{Claim, ClaimedTask, Coordinator};
pub use identity::{SystemInfo, WorkerIdentity};
pub use runner::{RunSummary, RunnerOptions, WorkerRunner};
