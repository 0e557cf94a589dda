//! `RunReportAssembler`: gathers cluster metadata into a `RunReport` and
//! publishes it to the broker.

#![forbid(unsafe_code)]

use std::sync::Arc;

use chaoscope_broker::{BrokerClient, BrokerError};
use chaoscope_core::prelude::{NodeInfo, RunReport, Taint};
use chaoscope_core::report::NodeRole;
use chaoscope_gateway::{ClusterGateway, GatewayError, NodeSummary};
use chaoscope_sink::SafeSink;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to collect cluster metadata: {0}")]
    Collection(#[from] GatewayError),
    #[error("failed to serialize run report: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to publish run report: {0}")]
    Publish(#[from] BrokerError),
}

const NODE_ROLE_INFRA_LABEL: &str = "node-role.k8s.io/infra";
const NODE_ROLE_WORKER_LABEL: &str = "node-role.k8s.io/worker";
const NODE_ROLE_MASTER_LABEL: &str = "node-role.k8s.io/master";
const NODE_ROLE_WORKLOAD_LABEL: &str = "node-role.k8s.io/workload";
const NODE_ROLE_APPLICATION_LABEL: &str = "node-role.k8s.io/app";

fn classify_role(node: &NodeSummary) -> NodeRole {
    if node.labels.contains_key(NODE_ROLE_INFRA_LABEL) {
        NodeRole::Infra
    } else if node.labels.contains_key(NODE_ROLE_WORKER_LABEL) {
        NodeRole::Worker
    } else if node.labels.contains_key(NODE_ROLE_MASTER_LABEL) {
        NodeRole::Master
    } else if node.labels.contains_key(NODE_ROLE_WORKLOAD_LABEL) {
        NodeRole::Workload
    } else if node.labels.contains_key(NODE_ROLE_APPLICATION_LABEL) {
        NodeRole::Application
    } else {
        NodeRole::Unknown
    }
}

fn node_info(node: &NodeSummary) -> NodeInfo {
    NodeInfo {
        count: 1,
        architecture: node.architecture.clone(),
        instance_type: node.instance_type.clone().unwrap_or_else(|| "unknown".to_string()),
        node_type: classify_role(node),
        kernel_version: node.kernel_version.clone(),
        kubelet_version: node.kubelet_version.clone(),
        os_version: node.os_image.clone(),
    }
}

pub struct RunReportAssembler<G> {
    gateway: Arc<G>,
    sink: Arc<SafeSink>,
}

impl<G> RunReportAssembler<G>
where
    G: ClusterGateway,
{
    pub fn new(gateway: Arc<G>, sink: Arc<SafeSink>) -> Self {
        Self { gateway, sink }
    }

    /// Collects node summaries/taints, a caller-supplied Kind census, and
    /// cloud/network/version metadata into `report`, mutating it in place.
    pub async fn collect(&self, report: &mut RunReport, kinds: &[String]) -> Result<(), ReportError> {
        self.sink.info("collecting telemetry data, please wait....");

        let nodes = self.gateway.list_nodes().await?;
        report.node_summary_infos = nodes.iter().map(node_info).collect();
        report.total_node_count = nodes.len() as u32;
        report.node_taints = nodes
            .iter()
            .flat_map(|node| {
                node.taints.iter().map(move |t| Taint {
                    node_name: node.name.clone(),
                    effect: t.effect.clone(),
                    key: t.key.clone(),
                    value: t.value.clone(),
                })
            })
            .collect();

        report.kubernetes_objects_count = self.gateway.list_all_kinds(kinds).await?;

        let metadata = self.gateway.cluster_metadata().await?;
        report.cluster_version = metadata.cluster_version;
        report.cloud_infrastructure = metadata.cloud_platform.unwrap_or_else(|| "Unknown".to_string());
        report.network_plugins = if metadata.network_plugins.is_empty() {
            vec!["Unknown".to_string()]
        } else {
            metadata.network_plugins
        };

        Ok(())
    }

    /// Serializes `report` and POSTs it to `<broker>/telemetry`, returning
    /// the JSON body that was sent so the caller can archive it locally.
    pub async fn publish(
        &self,
        broker: &BrokerClient,
        report: &RunReport,
        telemetry_group: &str,
    ) -> Result<String, ReportError> {
        let json = serde_json::to_string(report)?;
        broker.send_telemetry(&report.run_uuid, telemetry_group, json.clone()).await?;
        Ok(json)
    }
}
