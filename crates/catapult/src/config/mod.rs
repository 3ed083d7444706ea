pub mod loader;
pub mod schema;

pub use loader::{load_settings, load_settings_from_str, write_worker_template};
pub use schema::{
    expand_tilde, DetectorSettings, EngineSettings, LoggingSettings, MonitorSettings, Settings,
    WorkerSettings,
};
