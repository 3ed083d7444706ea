use std::path::Path;

use crate::config::schema::Settings;
use crate::error::ConfigError;

pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_settings_from_str(&content)
}

pub fn load_settings_from_str(content: &str) -> Result<Settings, ConfigError> {
    let settings: Settings = serde_json::from_str(content)?;

    validate_settings(&settings)?;

    Ok(settings)
}

fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    if settings.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported settings version: {}", settings.version),
        });
    }

    let positive = [
        ("monitor.poll_interval_secs", settings.monitor.poll_interval_secs),
        ("detector.interval_secs", settings.detector.interval_secs),
        ("detector.stall_threshold_secs", settings.detector.stall_threshold_secs),
        ("worker.interval_ms", settings.worker.interval_ms),
        ("worker.heartbeat_secs", settings.worker.heartbeat_secs),
    ];
    for (name, value) in positive {
        if value == 0 {
            return Err(ConfigError::Validation {
                message: format!("{} must be greater than zero", name),
            });
        }
    }

    if settings.worker.queues.is_empty() || settings.worker.queues.iter().any(|q| q.trim().is_empty()) {
        return Err(ConfigError::Validation {
            message: "worker.queues must list at least one non-empty queue name".to_string(),
        });
    }

    if settings.engine.path.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "engine.path must not be empty".to_string(),
        });
    }

    if tracing_subscriber::EnvFilter::try_new(&settings.logging.level).is_err() {
        return Err(ConfigError::Validation {
            message: format!("Invalid logging.level directive: {}", settings.logging.level),
        });
    }

    Ok(())
}

/// Writes a worker settings skeleton for `name` on `hostname`.
pub fn write_worker_template<P: AsRef<Path>>(
    path: P,
    name: &str,
    hostname: &str,
) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let mut settings = Settings::default();
    settings.worker.name = Some(name.to_string());
    settings.worker.hostname = Some(hostname.to_string());
    settings.worker.logfile = Some(format!("~/.catapult/logs/{}.log", name));

    let json = serde_json::to_string_pretty(&settings)?;
    std::fs::write(path, json).map_err(|e| ConfigError::WriteFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_uses_defaults() {
        let settings = load_settings_from_str("{}").unwrap();
        assert_eq!(settings.engine.path, "diann");
        assert_eq!(settings.detector.interval_secs, 10);
        assert_eq!(settings.detector.threshold_secs, 300);
        assert_eq!(settings.worker.queues, vec!["default"]);
        assert_eq!(settings.worker.max_retries, 5);
        assert_eq!(settings.worker.retry_delay_secs, 300);
        assert!(settings.database_path().is_some());
    }

    #[test]
    fn test_partial_sections() {
        let settings = load_settings_from_str(
            r#"{
                "database_path": "/srv/catapult.db",
                "worker": { "name": "w1", "queues": ["gpu", "default"] },
                "logging": { "level": "catapult=debug", "json": true }
            }"#,
        )
        .unwrap();
        assert_eq!(settings.worker.name.as_deref(), Some("w1"));
        assert_eq!(settings.worker.interval_ms, 1000);
        assert_eq!(settings.worker.queues.len(), 2);
        assert!(settings.logging.json);
        assert_eq!(
            settings.database_path().unwrap(),
            std::path::PathBuf::from("/srv/catapult.db")
        );
    }

    #[test]
    fn test_invalid_version() {
        assert!(matches!(
            load_settings_from_str(r#"{"version": "2.0"}"#),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(load_settings_from_str(r#"{"detector": {"interval_secs": 0}}"#).is_err());
    }

    #[test]
    fn test_empty_queue_list_rejected() {
        assert!(load_settings_from_str(r#"{"worker": {"queues": []}}"#).is_err());
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            load_settings_from_str("{ not json"),
            Err(ConfigError::ParseJson(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_settings("/nonexistent/catapult.json"),
            Err(ConfigError::ReadFile { .. })
        ));
    }

    #[test]
    fn test_worker_template_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.json");
        write_worker_template(&path, "w7", "lab-pc-7").unwrap();

        let settings = load_settings(&path).unwrap();
        assert_eq!(settings.worker.name.as_deref(), Some("w7"));
        assert_eq!(settings.worker.hostname.as_deref(), Some("lab-pc-7"));
        assert!(settings.worker.logfile.unwrap().ends_with("w7.log"));
    }
}
