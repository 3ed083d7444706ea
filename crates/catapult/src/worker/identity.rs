//! Who a worker process is and what machine it runs on.

use serde::Serialize;

use crate::config::WorkerSettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentity {
    pub name: String,
    pub hostname: String,
}

impl WorkerIdentity {
    /// Explicit values win over settings; the machine hostname is the last
    /// resort for both fields.
    pub fn resolve(settings: &WorkerSettings, name: Option<&str>, hostname: Option<&str>) -> Self {
        let machine = machine_hostname();
        let hostname = hostname
            .map(str::to_string)
            .or_else(|| settings.hostname.clone())
            .unwrap_or_else(|| machine.clone());
        let name = name
            .map(str::to_string)
            .or_else(|| settings.name.clone())
            .unwrap_or_else(|| format!("{}-{}", hostname, std::process::id()));
        Self { name, hostname }
    }
}

pub fn machine_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string())
}

/// Host facts recorded on the worker row at registration.
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub os: &'static str,
    pub arch: &'static str,
    pub hostname: String,
    pub logical_cpus: usize,
    pub physical_cpus: usize,
}

impl SystemInfo {
    pub fn collect() -> Self {
        Self {
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            hostname: machine_hostname(),
            logical_cpus: num_cpus::get(),
            physical_cpus: num_cpus::get_physical(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_values_win() {
        let mut settings = WorkerSettings::default();
        settings.name = Some("from-settings".to_string());
        settings.hostname = Some("host-s".to_string());

        let id = WorkerIdentity::resolve(&settings, Some("cli"), None);
        assert_eq!(id.name, "cli");
        assert_eq!(id.hostname, "host-s");

        let id = WorkerIdentity::resolve(&settings, None, Some("host-c"));
        assert_eq!(id.name, "from-settings");
        assert_eq!(id.hostname, "host-c");
    }

    #[test]
    fn test_default_name_derives_from_hostname() {
        let id = WorkerIdentity::resolve(&WorkerSettings::default(), None, Some("box"));
        assert_eq!(id.name, format!("box-{}", std::process::id()));
    }

    #[test]
    fn test_system_info_json() {
        let info: serde_json::Value = serde_json::from_str(&SystemInfo::collect().to_json()).unwrap();
        assert_eq!(info["os"], std::env::consts::OS);
        assert!(info["logical_cpus"].as_u64().unwrap() >= 1);
    }
}
