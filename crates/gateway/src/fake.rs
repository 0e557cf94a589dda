//! Scripted `ClusterGateway` test double. Drives the observer/extractor test
//! suites without a live cluster by replaying a fixed sequence of watch
//! events and canned exec output handed to it up front.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio_stream::wrappers::ReceiverStream;

use crate::types::{
    ClusterGateway, ClusterMetadata, ExecFrame, ExecStream, GatewayError, ListedPod, NodeSummary,
    PodState, WatchEvent, WatchStream,
};

/// Builds up the scripted responses, then hands out a [`FakeGateway`] that
/// replays them in order.
#[derive(Default)]
pub struct FakeGatewayBuilder {
    initial_pods: Vec<ListedPod>,
    resource_version: String,
    watch_events: Vec<WatchEvent>,
    exec_frames: Vec<ExecFrame>,
    nodes: Vec<NodeSummary>,
    kind_counts: HashMap<String, i64>,
    reads: HashMap<(String, String), PodState>,
    cluster_metadata: ClusterMetadata,
}

impl FakeGatewayBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_pods(mut self, resource_version: &str, pods: Vec<ListedPod>) -> Self {
        self.resource_version = resource_version.to_string();
        self.initial_pods = pods;
        self
    }

    pub fn with_watch_events(mut self, events: Vec<WatchEvent>) -> Self {
        self.watch_events = events;
        self
    }

    pub fn with_exec_frames(mut self, frames: Vec<ExecFrame>) -> Self {
        self.exec_frames = frames;
        self
    }

    pub fn with_nodes(mut self, nodes: Vec<NodeSummary>) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn with_kind_counts(mut self, counts: HashMap<String, i64>) -> Self {
        self.kind_counts = counts;
        self
    }

    pub fn with_pod_read(mut self, name: &str, namespace: &str, state: PodState) -> Self {
        self.reads
            .insert((name.to_string(), namespace.to_string()), state);
        self
    }

    pub fn with_cluster_metadata(mut self, metadata: ClusterMetadata) -> Self {
        self.cluster_metadata = metadata;
        self
    }

    pub fn build(self) -> FakeGateway {
        FakeGateway {
            initial_pods: self.initial_pods,
            resource_version: self.resource_version,
            watch_events: Mutex::new(self.watch_events),
            exec_frames: Mutex::new(self.exec_frames),
            nodes: self.nodes,
            kind_counts: self.kind_counts,
            reads: self.reads,
            cluster_metadata: self.cluster_metadata,
        }
    }
}

pub struct FakeGateway {
    initial_pods: Vec<ListedPod>,
    resource_version: String,
    watch_events: Mutex<Vec<WatchEvent>>,
    exec_frames: Mutex<Vec<ExecFrame>>,
    nodes: Vec<NodeSummary>,
    kind_counts: HashMap<String, i64>,
    reads: HashMap<(String, String), PodState>,
    cluster_metadata: ClusterMetadata,
}

impl FakeGateway {
    pub fn builder() -> FakeGatewayBuilder {
        FakeGatewayBuilder::new()
    }
}

#[async_trait::async_trait]
impl ClusterGateway for FakeGateway {
    async fn list_pods(
        &self,
        _selector: Option<&str>,
        _namespace: Option<&str>,
    ) -> Result<Vec<ListedPod>, GatewayError> {
        Ok(self.initial_pods.clone())
    }

    async fn watch_pods(
        &self,
        resource_version: &str,
        _selector: Option<&str>,
        _namespace: Option<&str>,
        _timeout_seconds: u64,
    ) -> Result<WatchStream, GatewayError> {
        if resource_version != self.resource_version && !self.resource_version.is_empty() {
            return Err(GatewayError::Transport(format!(
                "stale resource version: expected {}, got {resource_version}",
                self.resource_version
            )));
        }
        let events = std::mem::take(&mut *self.watch_events.lock().unwrap());
        let (tx, rx) = tokio::sync::mpsc::channel(events.len().max(1));
        for event in events {
            let _ = tx.send(Ok(event)).await;
        }
        drop(tx);
        let stream: WatchStream = Box::pin(ReceiverStream::new(rx));
        Ok(stream)
    }

    async fn exec_stream(
        &self,
        _pod: &str,
        _container: &str,
        _namespace: &str,
        _argv: &[String],
        _want_stdout: bool,
        _want_stderr: bool,
    ) -> Result<ExecStream, GatewayError> {
        let frames = std::mem::take(&mut *self.exec_frames.lock().unwrap());
        let (tx, rx) = tokio::sync::mpsc::channel(frames.len().max(1));
        for frame in frames {
            let _ = tx.send(Ok(frame)).await;
        }
        drop(tx);
        let stream: ExecStream = Box::pin(ReceiverStream::new(rx));
        Ok(stream)
    }

    async fn read_pod(&self, name: &str, namespace: &str) -> Result<PodState, GatewayError> {
        self.reads
            .get(&(name.to_string(), namespace.to_string()))
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("{namespace}/{name}")))
    }

    async fn list_all_kinds(&self, kinds: &[String]) -> Result<HashMap<String, i64>, GatewayError> {
        Ok(kinds
            .iter()
            .filter_map(|k| self.kind_counts.get(k).map(|count| (k.clone(), *count)))
            .collect())
    }

    async fn list_nodes(&self) -> Result<Vec<NodeSummary>, GatewayError> {
        Ok(self.nodes.clone())
    }

    async fn cluster_metadata(&self) -> Result<ClusterMetadata, GatewayError> {
        Ok(self.cluster_metadata.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WatchEventType;
    use futures::StreamExt;

    fn pod(name: &str, namespace: &str) -> PodState {
        PodState {
            name: name.to_string(),
            namespace: namespace.to_string(),
            phase: "Running".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn replays_scripted_watch_events_in_order() {
        let gw = FakeGateway::builder()
            .with_initial_pods("100", vec![])
            .with_watch_events(vec![
                WatchEvent {
                    event_type: WatchEventType::Added,
                    pod: pod("a", "ns"),
                },
                WatchEvent {
                    event_type: WatchEventType::Deleted,
                    pod: pod("a", "ns"),
                },
            ])
            .build();

        let mut stream = gw.watch_pods("100", None, None, 30).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.event_type, WatchEventType::Added);
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.event_type, WatchEventType::Deleted);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn stale_resource_version_is_rejected() {
        let gw = FakeGateway::builder()
            .with_initial_pods("100", vec![])
            .build();
        let result = gw.watch_pods("42", None, None, 30).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unscripted_read_is_not_found() {
        let gw = FakeGateway::builder().build();
        let result = gw.read_pod("missing", "ns").await;
        assert!(matches!(result, Err(GatewayError::NotFound(_))));
    }
}
