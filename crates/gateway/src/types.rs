//! Contract types and the `ClusterGateway` trait itself.

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

pub type WatchStream = Pin<Box<dyn Stream<Item = Result<WatchEvent, GatewayError>> + Send>>;
pub type ExecStream = Pin<Box<dyn Stream<Item = Result<ExecFrame, GatewayError>> + Send>>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transport error talking to the cluster: {0}")]
    Transport(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("remote command exited non-zero (code {0})")]
    NonZeroExit(i32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedPod {
    pub name: String,
    pub namespace: String,
    /// Resource version of the cluster at the moment of this list call; the
    /// same value is carried on every entry from one `list_pods` call.
    pub resource_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
}

/// A pod's observable state at the moment of a watch event or a direct read.
#[derive(Debug, Clone, Default)]
pub struct PodState {
    pub name: String,
    pub namespace: String,
    pub phase: String,
    pub deletion_timestamp: Option<f64>,
    /// Ready flag per container status; empty means the pod carries no
    /// container statuses yet (never considered all-ready).
    pub container_ready: Vec<bool>,
    pub node_name: Option<String>,
    pub volumes: Vec<String>,
}

impl PodState {
    /// True when the container-status list is non-empty and every entry
    /// reports ready=true.
    pub fn all_containers_ready(&self) -> bool {
        !self.container_ready.is_empty() && self.container_ready.iter().all(|ready| *ready)
    }

    pub fn is_terminating(&self) -> bool {
        self.deletion_timestamp.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub event_type: WatchEventType,
    pub pod: PodState,
}

#[derive(Debug, Clone, Default)]
pub enum ExecFrame {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    #[default]
    Empty,
}

#[derive(Debug, Clone, Default)]
pub struct NodeSummary {
    pub name: String,
    pub labels: HashMap<String, String>,
    pub architecture: String,
    pub kernel_version: String,
    pub kubelet_version: String,
    pub os_image: String,
    pub instance_type: Option<String>,
    pub taints: Vec<NodeTaint>,
}

#[derive(Debug, Clone)]
pub struct NodeTaint {
    pub key: String,
    pub value: String,
    pub effect: String,
}

/// Cluster-wide facts the report assembler can't get from `list_nodes`:
/// the Kubernetes/OpenShift version, the cloud platform tag from the
/// `infrastructures/cluster` custom object, and the network plugin names
/// from the `networks` custom object. Any of the three fall back to a
/// caller-visible default when the cluster doesn't expose them (a vanilla
/// cluster has no `config.openshift.io` API group at all).
#[derive(Debug, Clone, Default)]
pub struct ClusterMetadata {
    pub cluster_version: Option<String>,
    pub cloud_platform: Option<String>,
    pub network_plugins: Vec<String>,
}

/// Minimal contract the core consumes to talk to a cluster. One production
/// implementation (`KubeGateway`) sits on top of `kube`; a scripted
/// `FakeGateway` (behind `test-util`) drives the observer/extractor test
/// suites without a live cluster.
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    async fn list_pods(
        &self,
        selector: Option<&str>,
        namespace: Option<&str>,
    ) -> Result<Vec<ListedPod>, GatewayError>;

    async fn watch_pods(
        &self,
        resource_version: &str,
        selector: Option<&str>,
        namespace: Option<&str>,
        timeout_seconds: u64,
    ) -> Result<WatchStream, GatewayError>;

    async fn exec_stream(
        &self,
        pod: &str,
        container: &str,
        namespace: &str,
        argv: &[String],
        want_stdout: bool,
        want_stderr: bool,
    ) -> Result<ExecStream, GatewayError>;

    async fn read_pod(&self, name: &str, namespace: &str) -> Result<PodState, GatewayError>;

    async fn list_all_kinds(&self, kinds: &[String]) -> Result<HashMap<String, i64>, GatewayError>;

    async fn list_nodes(&self) -> Result<Vec<NodeSummary>, GatewayError>;

    async fn cluster_metadata(&self) -> Result<ClusterMetadata, GatewayError>;
}
