//! In-process broadcast channels that external transports (websocket
//! relays, dashboards) subscribe to.

pub mod log_broadcaster;
pub mod monitor_events;
pub mod notifications;

pub use log_broadcaster::{LogBroadcaster, LogEvent, LogStream};
pub use monitor_events::{MonitorEvent, MonitorEventBroadcaster, MonitorEventKind};
pub use notifications::{TaskEvent, TaskEventBroadcaster, TaskEventKind};
