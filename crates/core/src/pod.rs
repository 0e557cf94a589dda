//! Pod lifecycle data model: one observation session's worth of state.
//!
//! `PodsSnapshot` is mutated only by the watch loop in `chaoscope-observer`;
//! `reduce()` is a pure function over the finished snapshot and lives here so
//! it can be unit-tested without any cluster or async runtime.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// One of the five states a pod event can carry. Ordering within a pod's
/// `status_changes` is insertion order, not a property of this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodStatus {
    Ready,
    NotReady,
    DeletionScheduled,
    Deleted,
    Added,
}

/// A single observation on a pod. `timestamp` is fixed at construction and
/// never mutated afterwards — there is deliberately no setter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodEvent {
    pub status: PodStatus,
    timestamp: f64,
    /// Name of the pod this one replaces, when the gateway tags it. None of
    /// the shipped gateways populate this (the field always carries `None`
    /// in practice), but the successor search in `PodsSnapshot::reduce` still
    /// checks it first before falling back to timestamp correlation.
    pub parent: Option<String>,
}

impl PodEvent {
    pub fn new(status: PodStatus, parent: Option<String>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_secs_f64();
        Self {
            status,
            timestamp,
            parent,
        }
    }

    /// Construct with an explicit timestamp. Used by tests and by replay
    /// fixtures that need reproducible timing.
    pub fn at(status: PodStatus, timestamp: f64, parent: Option<String>) -> Self {
        Self {
            status,
            timestamp,
            parent,
        }
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

/// Per-pod history within one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoredPod {
    pub name: String,
    pub namespace: String,
    pub status_changes: Vec<PodEvent>,
}

impl MonitoredPod {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            status_changes: Vec::new(),
        }
    }

    fn first(&self, status: PodStatus) -> Option<&PodEvent> {
        self.status_changes.iter().find(|e| e.status == status)
    }
}

/// One observation session: the pod set selected up front, plus everything
/// the watch loop appended to it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PodsSnapshot {
    pub resource_version: String,
    pub pods: HashMap<String, MonitoredPod>,
    pub initial_pods: Vec<String>,
    pub added_pods: Vec<String>,
    /// namespace -> pod names, maintained alongside `pods` to make the
    /// successor search in `reduce()` cheap. Not part of the public
    /// contract; two snapshots with the same `pods`/`initial_pods` compare
    /// equal in every externally observable way regardless of this field.
    #[serde(skip)]
    namespace_index: HashMap<String, Vec<String>>,
}

impl PodsSnapshot {
    pub fn new(resource_version: impl Into<String>) -> Self {
        Self {
            resource_version: resource_version.into(),
            ..Default::default()
        }
    }

    /// Registers a pod discovered during selection. Idempotent for a name
    /// already present.
    pub fn insert_initial(&mut self, name: &str, namespace: &str) {
        if !self.pods.contains_key(name) {
            self.pods
                .insert(name.to_string(), MonitoredPod::new(name, namespace));
            self.namespace_index
                .entry(namespace.to_string())
                .or_default()
                .push(name.to_string());
        }
        self.initial_pods.push(name.to_string());
    }

    /// Registers a pod first observed via an ADDED watch event. If a pod of
    /// the same name is already tracked (same-name respawn), the existing
    /// MonitoredPod and its event log are kept.
    pub fn insert_added(&mut self, name: &str, namespace: &str) {
        self.added_pods.push(name.to_string());
        if !self.pods.contains_key(name) {
            self.pods
                .insert(name.to_string(), MonitoredPod::new(name, namespace));
            self.namespace_index
                .entry(namespace.to_string())
                .or_default()
                .push(name.to_string());
        }
    }

    /// Appends an event to an already-tracked pod. Events for names absent
    /// from `pods` are silently skipped by the caller before reaching here.
    pub fn record_event(&mut self, name: &str, event: PodEvent) {
        if let Some(pod) = self.pods.get_mut(name) {
            pod.status_changes.push(event);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pods.contains_key(name)
    }

    fn successor(&self, parent_name: &str, parent_namespace: &str, deletion_ts: f64) -> Option<&MonitoredPod> {
        for pod in self.pods.values() {
            let tagged = pod
                .status_changes
                .iter()
                .any(|e| e.status == PodStatus::Added && e.parent.as_deref() == Some(parent_name));
            if tagged {
                return Some(pod);
            }
        }

        let candidates = self.namespace_index.get(parent_namespace)?;
        let mut best: Option<(&MonitoredPod, f64)> = None;
        for name in candidates {
            if name == parent_name {
                continue;
            }
            let Some(pod) = self.pods.get(name) else { continue };
            let Some(added) = pod.first(PodStatus::Added) else { continue };
            let ts = added.timestamp();
            if ts <= deletion_ts {
                continue;
            }
            if best.map(|(_, best_ts)| ts < best_ts).unwrap_or(true) {
                best = Some((pod, ts));
            }
        }
        best.map(|(pod, _)| pod)
    }

    /// Reduces the finished snapshot into a `RecoveryReport`: pods that
    /// reached full readiness are recovered, pods still tracked but never
    /// ready are unrecovered, and a successor search fills in rescheduling
    /// timestamps before falling back to timestamp correlation.
    pub fn reduce(&self) -> RecoveryReport {
        let mut recovered = Vec::new();
        let mut unrecovered = Vec::new();

        for name in &self.initial_pods {
            let Some(pod) = self.pods.get(name) else { continue };

            for (idx, event) in pod.status_changes.iter().enumerate() {
                match event.status {
                    PodStatus::NotReady => {
                        let ready_after = pod.status_changes[idx + 1..]
                            .iter()
                            .find(|e| e.status == PodStatus::Ready);
                        match ready_after {
                            None => unrecovered.push(AffectedPod::bare(&pod.name, &pod.namespace)),
                            Some(ready) => recovered.push(AffectedPod {
                                pod_name: pod.name.clone(),
                                namespace: pod.namespace.clone(),
                                pod_rescheduling_time: None,
                                pod_readiness_time: Some(ready.timestamp() - event.timestamp()),
                                total_recovery_time: None,
                            }),
                        }
                        break;
                    }
                    PodStatus::DeletionScheduled => {
                        let Some(successor) = self.successor(&pod.name, &pod.namespace, event.timestamp())
                        else {
                            unrecovered.push(AffectedPod::bare(&pod.name, &pod.namespace));
                            break;
                        };
                        let added_ts = successor.first(PodStatus::Added).map(|e| e.timestamp());
                        let ready_ts = successor.first(PodStatus::Ready).map(|e| e.timestamp());
                        match ready_ts {
                            None => unrecovered.push(AffectedPod::bare(&successor.name, &pod.namespace)),
                            Some(ready_ts) => {
                                let rescheduling_time = added_ts.map(|a| a - event.timestamp());
                                let readiness_time = Some(ready_ts - event.timestamp());
                                let total_recovery_time = match (rescheduling_time, readiness_time) {
                                    (Some(r), Some(rd)) => Some(r + rd),
                                    _ => None,
                                };
                                recovered.push(AffectedPod {
                                    pod_name: successor.name.clone(),
                                    namespace: successor.namespace.clone(),
                                    pod_rescheduling_time: rescheduling_time,
                                    pod_readiness_time: readiness_time,
                                    total_recovery_time,
                                });
                            }
                        }
                        break;
                    }
                    _ => continue,
                }
            }
        }

        RecoveryReport {
            recovered,
            unrecovered,
            error: None,
        }
    }
}

/// Reduced verdict for one initial pod or its successor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffectedPod {
    pub pod_name: String,
    pub namespace: String,
    pub pod_rescheduling_time: Option<f64>,
    pub pod_readiness_time: Option<f64>,
    pub total_recovery_time: Option<f64>,
}

impl AffectedPod {
    fn bare(pod_name: &str, namespace: &str) -> Self {
        Self {
            pod_name: pod_name.to_string(),
            namespace: namespace.to_string(),
            pod_rescheduling_time: None,
            pod_readiness_time: None,
            total_recovery_time: None,
        }
    }
}

/// Output of one observation session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub recovered: Vec<AffectedPod>,
    pub unrecovered: Vec<AffectedPod>,
    pub error: Option<String>,
}

impl RecoveryReport {
    /// Merges another session's report into this one, per `ObserverPool::join`:
    /// concatenate recovered/unrecovered, or if either side has an error,
    /// join the error messages and drop both lists.
    pub fn merge(mut self, other: RecoveryReport) -> RecoveryReport {
        match (&mut self.error, other.error) {
            (Some(existing), Some(more)) => {
                existing.push_str(", ");
                existing.push_str(&more);
                self.recovered.clear();
                self.unrecovered.clear();
            }
            (None, Some(more)) => {
                self.error = Some(more);
                self.recovered.clear();
                self.unrecovered.clear();
            }
            (Some(_), None) => {
                self.recovered.clear();
                self.unrecovered.clear();
            }
            (None, None) => {
                self.recovered.extend(other.recovered);
                self.unrecovered.extend(other.unrecovered);
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_with(initial: &[(&str, &str)]) -> PodsSnapshot {
        let mut snap = PodsSnapshot::new("1");
        for (name, ns) in initial {
            snap.insert_initial(name, ns);
        }
        snap
    }

    #[test]
    fn uneventful_pod_is_omitted() {
        let snap = snapshot_with(&[("p1", "ns")]);
        let report = snap.reduce();
        assert!(report.recovered.is_empty());
        assert!(report.unrecovered.is_empty());
    }

    #[test]
    fn not_ready_then_ready_recovers_with_nonnegative_readiness_time() {
        let mut snap = snapshot_with(&[("p1", "ns")]);
        snap.record_event("p1", PodEvent::at(PodStatus::NotReady, 10.0, None));
        snap.record_event("p1", PodEvent::at(PodStatus::Ready, 11.5, None));
        let report = snap.reduce();
        assert_eq!(report.recovered.len(), 1);
        assert_eq!(report.recovered[0].pod_readiness_time, Some(1.5));
        assert!(report.unrecovered.is_empty());
    }

    #[test]
    fn not_ready_without_later_ready_is_unrecovered() {
        let mut snap = snapshot_with(&[("p1", "ns")]);
        snap.record_event("p1", PodEvent::at(PodStatus::NotReady, 10.0, None));
        let report = snap.reduce();
        assert!(report.recovered.is_empty());
        assert_eq!(report.unrecovered.len(), 1);
        assert_eq!(report.unrecovered[0].pod_name, "p1");
    }

    #[test]
    fn same_name_replacement_recovers_via_deletion_scheduled() {
        let mut snap = snapshot_with(&[("p1", "ns"), ("p2", "ns")]);
        snap.record_event("p1", PodEvent::at(PodStatus::DeletionScheduled, 100.0, None));
        // same-name respawn: event log continues on the same MonitoredPod
        snap.record_event("p1", PodEvent::at(PodStatus::Added, 100.2, None));
        snap.record_event("p1", PodEvent::at(PodStatus::Ready, 101.2, None));
        let report = snap.reduce();
        assert_eq!(report.recovered.len(), 1);
        let verdict = &report.recovered[0];
        assert_eq!(verdict.pod_name, "p1");
        assert_eq!(verdict.pod_rescheduling_time, Some(0.2));
        assert_eq!(verdict.pod_readiness_time, Some(1.2));
        assert!((verdict.total_recovery_time.unwrap() - 1.4).abs() < 1e-9);
    }

    #[test]
    fn different_name_replacement_uses_nearest_added_in_namespace() {
        let mut snap = snapshot_with(&[("p1", "ns")]);
        snap.insert_added("p1r", "ns");
        snap.record_event("p1", PodEvent::at(PodStatus::DeletionScheduled, 50.0, None));
        snap.record_event("p1r", PodEvent::at(PodStatus::Added, 50.5, None));
        snap.record_event("p1r", PodEvent::at(PodStatus::Ready, 51.5, None));
        let report = snap.reduce();
        assert_eq!(report.recovered.len(), 1);
        let verdict = &report.recovered[0];
        assert_eq!(verdict.pod_name, "p1r");
        assert_eq!(verdict.pod_rescheduling_time, Some(0.5));
        assert_eq!(verdict.pod_readiness_time, Some(1.5));
    }

    #[test]
    fn negative_rescheduling_time_is_preserved_not_clamped() {
        let mut snap = snapshot_with(&[("p1", "ns")]);
        snap.insert_added("p1r", "ns");
        // platform reschedules ahead of emitting the deletion event
        snap.record_event("p1r", PodEvent::at(PodStatus::Added, 9.0, None));
        snap.record_event("p1", PodEvent::at(PodStatus::DeletionScheduled, 10.0, None));
        snap.record_event("p1r", PodEvent::at(PodStatus::Ready, 12.0, None));
        let report = snap.reduce();
        assert_eq!(report.recovered.len(), 1);
        assert_eq!(report.recovered[0].pod_rescheduling_time, Some(-1.0));
    }

    #[test]
    fn deletion_with_no_successor_is_unrecovered() {
        let mut snap = snapshot_with(&[("p1", "ns")]);
        snap.record_event("p1", PodEvent::at(PodStatus::DeletionScheduled, 10.0, None));
        let report = snap.reduce();
        assert!(report.recovered.is_empty());
        assert_eq!(report.unrecovered.len(), 1);
        assert_eq!(report.unrecovered[0].pod_name, "p1");
    }

    #[test]
    fn successor_added_but_never_ready_is_unrecovered_under_successor_name() {
        let mut snap = snapshot_with(&[("p1", "ns")]);
        snap.insert_added("p1r", "ns");
        snap.record_event("p1", PodEvent::at(PodStatus::DeletionScheduled, 10.0, None));
        snap.record_event("p1r", PodEvent::at(PodStatus::Added, 10.5, None));
        let report = snap.reduce();
        assert!(report.recovered.is_empty());
        assert_eq!(report.unrecovered.len(), 1);
        assert_eq!(report.unrecovered[0].pod_name, "p1r");
    }

    #[test]
    fn verdict_partition_holds() {
        let mut snap = snapshot_with(&[("p1", "ns"), ("p2", "ns")]);
        snap.record_event("p1", PodEvent::at(PodStatus::NotReady, 1.0, None));
        snap.record_event("p1", PodEvent::at(PodStatus::Ready, 2.0, None));
        snap.record_event("p2", PodEvent::at(PodStatus::NotReady, 1.0, None));
        let report = snap.reduce();
        let recovered_names: Vec<_> = report.recovered.iter().map(|p| &p.pod_name).collect();
        let unrecovered_names: Vec<_> = report.unrecovered.iter().map(|p| &p.pod_name).collect();
        for name in &recovered_names {
            assert!(!unrecovered_names.contains(name));
        }
        assert_eq!(recovered_names.len() + unrecovered_names.len(), 2);
    }

    #[test]
    fn merge_concatenates_when_no_errors() {
        let a = RecoveryReport {
            recovered: vec![AffectedPod::bare("p1", "ns")],
            unrecovered: vec![],
            error: None,
        };
        let b = RecoveryReport {
            recovered: vec![],
            unrecovered: vec![AffectedPod::bare("p2", "ns")],
            error: None,
        };
        let merged = a.merge(b);
        assert_eq!(merged.recovered.len(), 1);
        assert_eq!(merged.unrecovered.len(), 1);
        assert!(merged.error.is_none());
    }

    #[test]
    fn merge_joins_errors_and_empties_lists() {
        let a = RecoveryReport {
            recovered: vec![AffectedPod::bare("p1", "ns")],
            unrecovered: vec![],
            error: Some("timeout".into()),
        };
        let b = RecoveryReport {
            recovered: vec![],
            unrecovered: vec![AffectedPod::bare("p2", "ns")],
            error: Some("transport".into()),
        };
        let merged = a.merge(b);
        assert!(merged.recovered.is_empty());
        assert!(merged.unrecovered.is_empty());
        assert_eq!(merged.error.unwrap(), "timeout, transport");
    }
}
