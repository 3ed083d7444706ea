//! Process-wide logging setup.
//!
//! Pipeline code logs through `tracing`; the catalog layer uses `log`
//! macros, which are forwarded into the same subscriber by `LogTracer`.

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer};

/// Logging options for one process.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Force `debug` regardless of `level`.
    pub verbose: bool,
    /// Emit JSON lines on stderr.
    pub json: bool,
    /// Optional plain-text log file, appended to.
    pub logfile: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            verbose: false,
            json: false,
            logfile: None,
        }
    }
}

/// Installs the global subscriber. Call once, early in `main`.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = if config.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.level))
            .with_context(|| format!("Invalid log filter '{}'", config.level))?
    };

    let console = if config.json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).boxed()
    };

    let file = match &config.logfile {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create log directory: {}", parent.display())
                })?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .boxed(),
            )
        }
        None => None,
    };

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file);

    tracing::subscriber::set_global_default(subscriber)
        .context("A global tracing subscriber is already installed")?;
    tracing_log::LogTracer::init().context("A global `log` logger is already installed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert!(!config.verbose);
        assert!(config.logfile.is_none());
    }
}
