//! Catalog changes made by the filesystem monitor.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorEventKind {
    FileCreated,
    FileResized,
    FileMoved,
    FileRemoved,
    DescriptorIngested,
    DescriptorRejected,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: MonitorEventKind,
    pub location_id: i64,
    /// Logical path relative to the location root.
    pub path: String,
    pub detail: Option<String>,
}

impl MonitorEvent {
    pub fn new(kind: MonitorEventKind, location_id: i64, path: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            location_id,
            path: path.to_string(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Clone)]
pub struct MonitorEventBroadcaster {
    sender: broadcast::Sender<MonitorEvent>,
}

impl MonitorEventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn send(&self, event: MonitorEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.sender.subscribe()
    }
}

impl Default for MonitorEventBroadcaster {
    fn default() -> Self {
        Self::new(1000)
    }
}
