//! Task status notifications and alerts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskEventKind {
    Running,
    Success,
    Failure,
    Retry,
    /// Invariant violations and stalls that need a human.
    Alert,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: TaskEventKind,
    pub task_id: Option<String>,
    pub analysis_id: Option<i64>,
    pub message: String,
}

impl TaskEvent {
    pub fn task(kind: TaskEventKind, task_id: &str, analysis_id: i64, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            task_id: Some(task_id.to_string()),
            analysis_id: Some(analysis_id),
            message: message.into(),
        }
    }

    pub fn alert(analysis_id: Option<i64>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind: TaskEventKind::Alert,
            task_id: None,
            analysis_id,
            message: message.into(),
        }
    }
}

#[derive(Clone)]
pub struct TaskEventBroadcaster {
    sender: broadcast::Sender<TaskEvent>,
}

impl TaskEventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn send(&self, event: TaskEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }
}

impl Default for TaskEventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
