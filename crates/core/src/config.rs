//! The single configuration object shared by the extractor and publisher.

use serde::{Deserialize, Serialize};
use thiserror::Error;

fn default_telemetry_group() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api_url: String,
    pub username: String,
    pub password: String,
    pub backup_threads: u32,
    /// 0 means unbounded retries.
    pub max_retries: u32,
    pub archive_path: String,
    /// Per-volume size limit, in kilobytes.
    pub archive_size: u64,
    #[serde(default = "default_telemetry_group")]
    pub telemetry_group: String,
    pub prometheus_backup: bool,
    pub full_prometheus_backup: bool,
    #[serde(default)]
    pub logs_backup: bool,
    #[serde(default)]
    pub logs_filter_patterns: Vec<String>,
    #[serde(default)]
    pub oc_cli_path: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    /// Carries every offending field in one shot, matching the original's
    /// pattern of collecting all missing/invalid keys before raising.
    #[error("invalid configuration: {}", .0.join(", "))]
    Invalid(Vec<String>),
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut offenders = Vec::new();

        if self.api_url.trim().is_empty() {
            offenders.push("api_url is missing".to_string());
        }
        if self.username.trim().is_empty() {
            offenders.push("username is missing".to_string());
        }
        if self.password.trim().is_empty() {
            offenders.push("password is missing".to_string());
        }
        if self.backup_threads == 0 {
            offenders.push("backup_threads must be a positive integer".to_string());
        }
        if self.archive_path.trim().is_empty() {
            offenders.push("archive_path is missing".to_string());
        }
        if self.prometheus_backup && self.archive_size == 0 {
            offenders.push("archive_size is missing".to_string());
        }
        if self.logs_backup && self.logs_filter_patterns.is_empty() {
            offenders.push("logs_filter_patterns must be a non-empty list when logs_backup is enabled".to_string());
        }

        if offenders.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(offenders))
        }
    }

    /// `telemetry_group`, normalized: blank is treated as absent.
    pub fn telemetry_group(&self) -> &str {
        if self.telemetry_group.trim().is_empty() {
            "default"
        } else {
            &self.telemetry_group
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            api_url: "https://broker.example".to_string(),
            username: "user".to_string(),
            password: "pass".to_string(),
            backup_threads: 4,
            max_retries: 3,
            archive_path: "/tmp/chaoscope".to_string(),
            archive_size: 30_000,
            telemetry_group: "default".to_string(),
            prometheus_backup: true,
            full_prometheus_backup: false,
            logs_backup: false,
            logs_filter_patterns: vec![],
            oc_cli_path: None,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn collects_every_offender_at_once() {
        let mut config = valid_config();
        config.api_url = String::new();
        config.username = String::new();
        config.backup_threads = 0;
        let err = config.validate().unwrap_err();
        let ConfigError::Invalid(offenders) = err;
        assert!(offenders.iter().any(|o| o.contains("api_url")));
        assert!(offenders.iter().any(|o| o.contains("username")));
        assert!(offenders.iter().any(|o| o.contains("backup_threads")));
        assert_eq!(offenders.len(), 3);
    }

    #[test]
    fn blank_telemetry_group_defaults() {
        let mut config = valid_config();
        config.telemetry_group = "   ".to_string();
        assert_eq!(config.telemetry_group(), "default");
    }
}
