//! Filesystem monitoring of watch locations.

pub mod bundle;
pub mod filter;
pub mod handler;
pub mod watcher;

pub use filter::{EntryFilter, EntryKind};
pub use handler::{LocationHandler, ScanSummary};
pub use watcher::LocationMonitor;
