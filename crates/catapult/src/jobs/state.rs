//! Analysis and task lifecycles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::JobError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    BuildLibrary,
    LibrarySearch,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::BuildLibrary => "build_library",
            JobType::LibrarySearch => "library_search",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "build_library" => Ok(JobType::BuildLibrary),
            "library_search" => Ok(JobType::LibrarySearch),
            other => Err(JobError::UnknownJobType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failure,
    Retry,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Failure => "failure",
            TaskStatus::Retry => "retry",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failure)
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Retry, Running)
                | (Running, Success)
                | (Running, Failure)
                | (Running, Retry)
                | (Retry, Pending)
                | (Retry, Failure)
        )
    }

    /// Validated transition.
    pub fn transition(self, next: TaskStatus) -> Result<TaskStatus, JobError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(JobError::InvalidTransition {
                entity: "task",
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "success" => Ok(TaskStatus::Success),
            "failure" => Ok(TaskStatus::Failure),
            "retry" => Ok(TaskStatus::Retry),
            other => Err(JobError::UnknownStatus(other.to_string())),
        }
    }
}

/// Outcome of a failed run under the retry policy.
pub fn status_after_failure(attempts: u32, max_retries: u32, retryable: bool) -> TaskStatus {
    if retryable && attempts < max_retries {
        TaskStatus::Retry
    } else {
        TaskStatus::Failure
    }
}

/// Analysis lifecycle. Persisted as the (processing, completed) flag pair;
/// `Resolving` only exists inside a scheduler pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisState {
    Created,
    Resolving,
    Processing,
    Completed,
}

impl AnalysisState {
    pub fn from_flags(processing: bool, completed: bool) -> Self {
        match (processing, completed) {
            (_, true) => AnalysisState::Completed,
            (true, false) => AnalysisState::Processing,
            (false, false) => AnalysisState::Created,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisState::Created => "created",
            AnalysisState::Resolving => "resolving",
            AnalysisState::Processing => "processing",
            AnalysisState::Completed => "completed",
        }
    }

    pub fn can_transition_to(&self, next: AnalysisState) -> bool {
        use AnalysisState::*;
        matches!(
            (self, next),
            (Created, Resolving)
                | (Resolving, Processing)
                | (Resolving, Created)
                | (Processing, Completed)
                | (Processing, Created)
        )
    }

    pub fn transition(self, next: AnalysisState) -> Result<AnalysisState, JobError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(JobError::InvalidTransition {
                entity: "analysis",
                from: self.as_str().to_string(),
                to: next.as_str().to_string(),
            })
        }
    }
}

impl fmt::Display for AnalysisState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_happy_path() {
        let s = TaskStatus::Pending.transition(TaskStatus::Running).unwrap();
        let s = s.transition(TaskStatus::Success).unwrap();
        assert!(s.is_terminal());
    }

    #[test]
    fn test_task_retry_cycle() {
        let s = TaskStatus::Running.transition(TaskStatus::Retry).unwrap();
        let s = s.transition(TaskStatus::Pending).unwrap();
        assert_eq!(s.transition(TaskStatus::Running).unwrap(), TaskStatus::Running);
    }

    #[test]
    fn test_invalid_task_transitions() {
        for (from, to) in [
            (TaskStatus::Pending, TaskStatus::Success),
            (TaskStatus::Success, TaskStatus::Running),
            (TaskStatus::Failure, TaskStatus::Pending),
            (TaskStatus::Running, TaskStatus::Pending),
        ] {
            let err = from.transition(to).unwrap_err();
            assert!(matches!(err, JobError::InvalidTransition { entity: "task", .. }));
        }
    }

    #[test]
    fn test_retry_limit() {
        assert_eq!(status_after_failure(1, 5, true), TaskStatus::Retry);
        assert_eq!(status_after_failure(5, 5, true), TaskStatus::Failure);
        assert_eq!(status_after_failure(1, 5, false), TaskStatus::Failure);
    }

    #[test]
    fn test_status_strings() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Success,
            TaskStatus::Failure,
            TaskStatus::Retry,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("queued".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_analysis_lifecycle() {
        let s = AnalysisState::from_flags(false, false);
        assert_eq!(s, AnalysisState::Created);
        let s = s.transition(AnalysisState::Resolving).unwrap();
        assert_eq!(s.transition(AnalysisState::Created).unwrap(), AnalysisState::Created);
        let s = s.transition(AnalysisState::Processing).unwrap();
        let s = s.transition(AnalysisState::Completed).unwrap();
        assert!(s.transition(AnalysisState::Processing).is_err());
        assert_eq!(AnalysisState::from_flags(true, true), AnalysisState::Completed);
    }

    #[test]
    fn test_job_type_strings() {
        assert_eq!(JobType::BuildLibrary.to_string(), "build_library");
        assert_eq!("library_search".parse::<JobType>().unwrap(), JobType::LibrarySearch);

        assert!(matches!(
            "quantify".parse::<JobType>(),
            Err(JobError::UnknownJobType(name)) if name == "quantify"
        ));
    }
}
