//! Line-level broadcasting of engine output for live log viewers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// Which pipe of the engine process a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub task_id: String,
    pub stream: LogStream,
    pub line: String,
}

impl LogEvent {
    pub fn new(task_id: &str, stream: LogStream, line: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            task_id: task_id.to_string(),
            stream,
            line: line.to_string(),
        }
    }
}

/// Bounded fan-out of `LogEvent`s. Sending never blocks; subscribers that
/// fall behind skip ahead and see `RecvError::Lagged`.
#[derive(Clone)]
pub struct LogBroadcaster {
    sender: broadcast::Sender<LogEvent>,
}

impl LogBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn send(&self, event: LogEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.sender.subscribe()
    }

    pub fn line(&self, task_id: &str, stream: LogStream, line: &str) {
        self.send(LogEvent::new(task_id, stream, line));
    }
}

impl Default for LogBroadcaster {
    fn default() -> Self {
        Self::new(1000)
    }
}
