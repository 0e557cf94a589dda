//! Production `ClusterGateway` built on top of `kube`/`k8s-openapi`.
//!
//! Watching uses a single explicit `Api::watch` call rather than
//! `kube::runtime::watcher` — the observer needs the exact resource-version
//! and timeout semantics of one watch request, not the self-healing,
//! auto-relisting stream the runtime helper provides.

use std::collections::HashMap;

use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, AttachParams, ListParams, WatchEvent as KubeWatchEvent, WatchParams};
use kube::core::{DynamicObject, GroupVersionKind};
use kube::discovery::{Discovery, Scope};
use kube::{Client, Config};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use crate::types::{
    ClusterGateway, ClusterMetadata, ExecFrame, ExecStream, GatewayError, ListedPod, NodeSummary,
    NodeTaint, PodState, WatchEvent, WatchEventType, WatchStream,
};

/// `infrastructures.config.openshift.io` and `networks.config.openshift.io`
/// are OpenShift-only cluster-scoped singletons/lists; a vanilla Kubernetes
/// cluster simply doesn't serve this API group, so every lookup here treats
/// "not found" as absence rather than an error.
fn openshift_infrastructure_resource() -> kube::core::ApiResource {
    kube::core::ApiResource {
        group: "config.openshift.io".to_string(),
        version: "v1".to_string(),
        api_version: "config.openshift.io/v1".to_string(),
        kind: "Infrastructure".to_string(),
        plural: "infrastructures".to_string(),
    }
}

fn openshift_network_resource() -> kube::core::ApiResource {
    kube::core::ApiResource {
        group: "config.openshift.io".to_string(),
        version: "v1".to_string(),
        api_version: "config.openshift.io/v1".to_string(),
        kind: "Network".to_string(),
        plural: "networks".to_string(),
    }
}

pub struct KubeGateway {
    client: Client,
}

impl KubeGateway {
    /// Builds a client from the ambient kubeconfig / in-cluster config,
    /// exactly as a pod running inside the target cluster would.
    pub async fn new() -> Result<Self, GatewayError> {
        let config = Config::infer()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        let client =
            Client::try_from(config).map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    fn pods_api(&self, namespace: Option<&str>) -> Api<Pod> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    async fn find_api_resource(
        &self,
        gvk: &GroupVersionKind,
    ) -> Result<(kube::core::ApiResource, bool), GatewayError> {
        let discovery = Discovery::new(self.client.clone())
            .run()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        for group in discovery.groups() {
            for (ar, caps) in group.recommended_resources() {
                if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                    let namespaced = matches!(caps.scope, Scope::Namespaced);
                    return Ok((ar.clone(), namespaced));
                }
            }
        }
        Err(GatewayError::NotFound(format!(
            "{}/{}/{}",
            gvk.group, gvk.version, gvk.kind
        )))
    }
}

fn parse_gvk_key(key: &str) -> Result<GroupVersionKind, GatewayError> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] => Ok(GroupVersionKind {
            group: String::new(),
            version: (*version).to_string(),
            kind: (*kind).to_string(),
        }),
        [group, version, kind] => Ok(GroupVersionKind {
            group: (*group).to_string(),
            version: (*version).to_string(),
            kind: (*kind).to_string(),
        }),
        _ => Err(GatewayError::NotFound(format!(
            "invalid kind key: {key} (expected v1/Kind or group/v1/Kind)"
        ))),
    }
}

fn pod_state_from(pod: &Pod) -> PodState {
    let name = pod.metadata.name.clone().unwrap_or_default();
    let namespace = pod.metadata.namespace.clone().unwrap_or_default();
    let deletion_timestamp = pod
        .metadata
        .deletion_timestamp
        .as_ref()
        .map(|t| t.0.timestamp() as f64);
    let status = pod.status.as_ref();
    let phase = status
        .and_then(|s| s.phase.clone())
        .unwrap_or_else(|| "Unknown".to_string());
    let container_ready = status
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| statuses.iter().map(|c| c.ready).collect())
        .unwrap_or_default();
    let node_name = pod.spec.as_ref().and_then(|s| s.node_name.clone());
    let volumes = pod
        .spec
        .as_ref()
        .and_then(|s| s.volumes.as_ref())
        .map(|vols| vols.iter().map(|v| v.name.clone()).collect())
        .unwrap_or_default();

    PodState {
        name,
        namespace,
        phase,
        deletion_timestamp,
        container_ready,
        node_name,
        volumes,
    }
}

#[async_trait::async_trait]
impl ClusterGateway for KubeGateway {
    async fn list_pods(
        &self,
        selector: Option<&str>,
        namespace: Option<&str>,
    ) -> Result<Vec<ListedPod>, GatewayError> {
        let api = self.pods_api(namespace);
        // The only caller is the pod-recovery observer, which always
        // constrains its baseline listing to already-running pods.
        let mut lp = ListParams::default().fields("status.phase=Running");
        if let Some(sel) = selector {
            lp = lp.labels(sel);
        }
        let list = api
            .list(&lp)
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        let resource_version = list.metadata.resource_version.clone().unwrap_or_default();
        Ok(list
            .items
            .into_iter()
            .map(|pod| ListedPod {
                name: pod.metadata.name.clone().unwrap_or_default(),
                namespace: pod.metadata.namespace.clone().unwrap_or_default(),
                resource_version: resource_version.clone(),
            })
            .collect())
    }

    async fn watch_pods(
        &self,
        resource_version: &str,
        selector: Option<&str>,
        namespace: Option<&str>,
        timeout_seconds: u64,
    ) -> Result<WatchStream, GatewayError> {
        let api = self.pods_api(namespace);
        let mut wp = WatchParams::default().timeout(timeout_seconds as u32);
        if let Some(sel) = selector {
            wp = wp.labels(sel);
        }
        let stream = api
            .watch(&wp, resource_version)
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let mapped = stream
            .map_err(|e| GatewayError::Transport(e.to_string()))
            .filter_map(|item| async move {
                match item {
                    Ok(KubeWatchEvent::Added(pod)) => Some(Ok(WatchEvent {
                        event_type: WatchEventType::Added,
                        pod: pod_state_from(&pod),
                    })),
                    Ok(KubeWatchEvent::Modified(pod)) => Some(Ok(WatchEvent {
                        event_type: WatchEventType::Modified,
                        pod: pod_state_from(&pod),
                    })),
                    Ok(KubeWatchEvent::Deleted(pod)) => Some(Ok(WatchEvent {
                        event_type: WatchEventType::Deleted,
                        pod: pod_state_from(&pod),
                    })),
                    Ok(KubeWatchEvent::Bookmark(_)) => None,
                    Ok(KubeWatchEvent::Error(e)) => Some(Err(GatewayError::Transport(e.to_string()))),
                    Err(e) => Some(Err(e)),
                }
            });

        let boxed: WatchStream = Box::pin(mapped);
        Ok(boxed)
    }

    async fn exec_stream(
        &self,
        pod: &str,
        container: &str,
        namespace: &str,
        argv: &[String],
        want_stdout: bool,
        want_stderr: bool,
    ) -> Result<ExecStream, GatewayError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let ap = AttachParams::default()
            .container(container)
            .stdout(want_stdout)
            .stderr(want_stderr);

        let mut attached = api
            .exec(pod, argv.to_vec(), &ap)
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let (tx, rx) = mpsc::channel::<Result<ExecFrame, GatewayError>>(64);

        if let Some(stdout) = attached.stdout() {
            let tx = tx.clone();
            let mut frames = tokio_util::io::ReaderStream::new(stdout);
            tokio::spawn(async move {
                while let Some(chunk) = frames.next().await {
                    match chunk {
                        Ok(bytes) => {
                            if tx.send(Ok(ExecFrame::Stdout(bytes.to_vec()))).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(GatewayError::Transport(e.to_string()))).await;
                            break;
                        }
                    }
                }
            });
        }
        if let Some(stderr) = attached.stderr() {
            let tx = tx.clone();
            let mut frames = tokio_util::io::ReaderStream::new(stderr);
            tokio::spawn(async move {
                while let Some(chunk) = frames.next().await {
                    match chunk {
                        Ok(bytes) => {
                            if tx.send(Ok(ExecFrame::Stderr(bytes.to_vec()))).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(GatewayError::Transport(e.to_string()))).await;
                            break;
                        }
                    }
                }
            });
        }

        tokio::spawn(async move {
            match attached.join().await {
                Ok(()) => {}
                Err(e) => warn!(error = %e, "exec session ended with error"),
            }
        });

        drop(tx);
        let stream: ExecStream = Box::pin(ReceiverStream::new(rx));
        Ok(stream)
    }

    async fn read_pod(&self, name: &str, namespace: &str) -> Result<PodState, GatewayError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = api.get(name).await.map_err(|e| match e {
            kube::Error::Api(ae) if ae.code == 404 => {
                GatewayError::NotFound(format!("{namespace}/{name}"))
            }
            other => GatewayError::Transport(other.to_string()),
        })?;
        Ok(pod_state_from(&pod))
    }

    async fn list_all_kinds(&self, kinds: &[String]) -> Result<HashMap<String, i64>, GatewayError> {
        let mut counts = HashMap::new();
        for kind_key in kinds {
            let gvk = parse_gvk_key(kind_key)?;
            let (ar, namespaced) = match self.find_api_resource(&gvk).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(kind = %kind_key, error = %e, "skipping undiscoverable kind");
                    continue;
                }
            };
            // Cluster-wide count regardless of scope: namespaced kinds are
            // listed across every namespace via `all_with`.
            let _ = namespaced;
            let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);
            let list = api
                .list(&ListParams::default())
                .await
                .map_err(|e| GatewayError::Transport(e.to_string()))?;
            counts.insert(kind_key.clone(), list.items.len() as i64);
        }
        Ok(counts)
    }

    async fn list_nodes(&self) -> Result<Vec<NodeSummary>, GatewayError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(list
            .items
            .into_iter()
            .map(|node| {
                let labels = node.metadata.labels.clone().unwrap_or_default();
                let info = node.status.as_ref().and_then(|s| s.node_info.clone());
                let taints = node
                    .spec
                    .as_ref()
                    .and_then(|s| s.taints.as_ref())
                    .map(|taints| {
                        taints
                            .iter()
                            .map(|t| NodeTaint {
                                key: t.key.clone(),
                                value: t.value.clone().unwrap_or_default(),
                                effect: t.effect.clone(),
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                let instance_type = labels.get("node.k8s.io/instance-type").cloned();

                NodeSummary {
                    name: node.metadata.name.clone().unwrap_or_default(),
                    labels,
                    architecture: info
                        .as_ref()
                        .map(|i| i.architecture.clone())
                        .unwrap_or_default(),
                    kernel_version: info
                        .as_ref()
                        .map(|i| i.kernel_version.clone())
                        .unwrap_or_default(),
                    kubelet_version: info
                        .as_ref()
                        .map(|i| i.kubelet_version.clone())
                        .unwrap_or_default(),
                    os_image: info.as_ref().map(|i| i.os_image.clone()).unwrap_or_default(),
                    instance_type,
                    taints,
                }
            })
            .collect())
    }

    async fn cluster_metadata(&self) -> Result<ClusterMetadata, GatewayError> {
        let cluster_version = match self.client.apiserver_version().await {
            Ok(info) => Some(format!("{}.{}", info.major, info.minor)),
            Err(e) => {
                warn!(error = %e, "could not read apiserver version");
                None
            }
        };

        let infra_api: Api<DynamicObject> =
            Api::all_with(self.client.clone(), &openshift_infrastructure_resource());
        let cloud_platform = match infra_api.get("cluster").await {
            Ok(obj) => obj
                .data
                .get("status")
                .and_then(|s| s.get("platform"))
                .and_then(|p| p.as_str())
                .map(|s| s.to_string()),
            Err(e) => {
                warn!(error = %e, "could not read infrastructures/cluster, cloud platform unknown");
                None
            }
        };

        let network_api: Api<DynamicObject> =
            Api::all_with(self.client.clone(), &openshift_network_resource());
        let network_plugins = match network_api.list(&ListParams::default()).await {
            Ok(list) => list
                .items
                .iter()
                .filter_map(|obj| {
                    obj.data
                        .get("status")
                        .and_then(|s| s.get("networkType"))
                        .and_then(|n| n.as_str())
                        .map(|s| s.to_string())
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "could not read networks, network plugins unknown");
                Vec::new()
            }
        };

        Ok(ClusterMetadata {
            cluster_version,
            cloud_platform,
            network_plugins,
        })
    }
}
