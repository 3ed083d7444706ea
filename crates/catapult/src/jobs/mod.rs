//! Analysis jobs and their tasks: lifecycle rules, completion and the
//! scheduling pass that turns run configurations into queued tasks.

pub mod completion;
pub mod scheduler;
pub mod state;

use serde::{Deserialize, Serialize};

pub use completion::{evaluate_completion, CompletionCheck};
pub use scheduler::{ScheduleReport, Scheduler};
pub use state::{status_after_failure, AnalysisState, JobType, TaskStatus};

pub const DEFAULT_QUEUE: &str = "default";

/// Parameter blob stored on every task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskParams {
    pub argv: Vec<String>,
    pub file_ids: Vec<i64>,
    pub run_config_id: i64,
    pub location_id: i64,
    pub output_folder: String,
    pub report_path: String,
    #[serde(default)]
    pub keep_details: bool,
}

impl TaskParams {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
