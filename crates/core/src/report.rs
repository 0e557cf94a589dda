//! `RunReport` and friends: the envelope published to the broker.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pod::RecoveryReport;
use crate::scrub::scrub_secrets;

#[derive(Debug, Error)]
pub enum ParamParseError {
    #[error("parameters blob is not valid base64: {0}")]
    NotBase64(#[from] base64::DecodeError),
    #[error("parameters blob is not valid UTF-8: {0}")]
    NotUtf8(#[from] std::string::FromUtf8Error),
    #[error("parameters blob is not valid YAML: {0}")]
    NotYaml(#[from] serde_yaml::Error),
}

/// One scenario run embedded in a `RunReport`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioRecord {
    pub start_timestamp: f64,
    pub end_timestamp: f64,
    pub scenario: String,
    pub exit_status: i32,
    /// Empty once `set_parameters` has successfully parsed a blob into
    /// `parameters`; non-empty only while parsing has not yet happened or
    /// has failed.
    pub parameters_base64: String,
    pub parameters: serde_json::Value,
    pub affected_pods: RecoveryReport,
}

impl ScenarioRecord {
    pub fn new(scenario: impl Into<String>, start_timestamp: f64, end_timestamp: f64, exit_status: i32) -> Self {
        Self {
            start_timestamp,
            end_timestamp,
            scenario: scenario.into(),
            exit_status,
            parameters_base64: String::new(),
            parameters: serde_json::Value::Null,
            affected_pods: RecoveryReport::default(),
        }
    }

    /// Decodes a base64-encoded YAML scenario parameters blob, scrubs
    /// secrets, and stores the result. On success `parameters_base64` is
    /// cleared so the envelope never carries both forms at once.
    pub fn set_parameters(&mut self, raw_base64: &str) -> Result<(), ParamParseError> {
        let decoded = BASE64.decode(raw_base64)?;
        let text = String::from_utf8(decoded)?;
        let mut value: serde_json::Value = serde_yaml::from_str(&text)?;
        scrub_secrets(&mut value);
        self.parameters = value;
        self.parameters_base64 = String::new();
        Ok(())
    }
}

/// Node role, classified from well-known `node-role.k8s.io/*` labels.
/// Order of preference: infra > worker > master > workload > application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    Infra,
    Worker,
    Master,
    Workload,
    Application,
    Unknown,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeRole::Infra => "infra",
            NodeRole::Worker => "worker",
            NodeRole::Master => "master",
            NodeRole::Workload => "workload",
            NodeRole::Application => "application",
            NodeRole::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub count: u32,
    pub architecture: String,
    pub instance_type: String,
    pub node_type: NodeRole,
    pub kernel_version: String,
    pub kubelet_version: String,
    pub os_version: String,
}

impl Default for NodeInfo {
    fn default() -> Self {
        Self {
            count: 1,
            architecture: String::new(),
            instance_type: "unknown".to_string(),
            node_type: NodeRole::Unknown,
            kernel_version: String::new(),
            kubelet_version: String::new(),
            os_version: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Taint {
    pub node_name: String,
    pub effect: String,
    pub key: String,
    pub value: String,
}

/// Envelope posted to `<broker>/telemetry`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub schema_version: u32,
    pub generated_by: String,
    pub run_uuid: String,
    pub timestamp: String,
    pub scenarios: Vec<ScenarioRecord>,
    pub node_summary_infos: Vec<NodeInfo>,
    pub node_taints: Vec<Taint>,
    pub total_node_count: u32,
    pub kubernetes_objects_count: HashMap<String, i64>,
    pub network_plugins: Vec<String>,
    pub cloud_infrastructure: String,
    pub cloud_type: String,
    pub cluster_version: Option<String>,
}

impl RunReport {
    pub fn new(run_uuid: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            schema_version: 1,
            generated_by: format!("chaoscope/{}", env!("CARGO_PKG_VERSION")),
            run_uuid: run_uuid.into(),
            timestamp: timestamp.into(),
            scenarios: Vec::new(),
            node_summary_infos: Vec::new(),
            node_taints: Vec::new(),
            total_node_count: 0,
            kubernetes_objects_count: HashMap::new(),
            network_plugins: vec!["Unknown".to_string()],
            cloud_infrastructure: "Unknown".to_string(),
            cloud_type: "self-managed".to_string(),
            cluster_version: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_parameters_scrubs_and_clears_base64() {
        let yaml = "kubeconfig: secret-data\nother: value\n";
        let encoded = BASE64.encode(yaml);
        let mut record = ScenarioRecord::new("kill-pods", 0.0, 1.0, 0);
        record.set_parameters(&encoded).unwrap();
        assert_eq!(record.parameters_base64, "");
        assert_eq!(record.parameters["kubeconfig"], "anonymized");
        assert_eq!(record.parameters["other"], "value");
    }

    #[test]
    fn set_parameters_rejects_bad_base64() {
        let mut record = ScenarioRecord::new("kill-pods", 0.0, 1.0, 0);
        assert!(record.set_parameters("not base64!!").is_err());
    }
}
