//! A single `PodObserver` watch session: selection, the watch loop, and the
//! handle the caller uses to await or cancel it.

use std::collections::HashSet;
use std::sync::Arc;

use chaoscope_core::prelude::{PodEvent, PodStatus, PodsSnapshot, RecoveryReport};
use chaoscope_gateway::{ClusterGateway, WatchEventType};
use chaoscope_sink::SafeSink;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::selection::Selection;

/// Handle to a running session. The watch runs in a background task; the
/// caller either waits for it to finish or cancels it early.
pub struct SessionHandle {
    cancel: CancellationToken,
    join: JoinHandle<RecoveryReport>,
}

impl SessionHandle {
    #[cfg(test)]
    pub(crate) fn for_test(cancel: CancellationToken, join: JoinHandle<RecoveryReport>) -> Self {
        Self { cancel, join }
    }

    /// Signals the watch to close at the next event boundary. The session
    /// still finishes and reduces whatever partial snapshot it collected.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Awaits the session and reduces its snapshot into a `RecoveryReport`.
    pub async fn wait(self) -> RecoveryReport {
        match self.join.await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "observer session task panicked");
                RecoveryReport {
                    recovered: Vec::new(),
                    unrecovered: Vec::new(),
                    error: Some(format!("session task panicked: {e}")),
                }
            }
        }
    }
}

pub(crate) fn spawn_session<G>(
    gateway: Arc<G>,
    sink: Arc<SafeSink>,
    selection: Selection,
    max_timeout: u64,
) -> SessionHandle
where
    G: ClusterGateway + 'static,
{
    let cancel = CancellationToken::new();
    let cancel_child = cancel.clone();
    let join = tokio::spawn(async move {
        run_session(gateway, sink, selection, max_timeout, cancel_child).await
    });
    SessionHandle { cancel, join }
}

async fn run_session<G>(
    gateway: Arc<G>,
    sink: Arc<SafeSink>,
    selection: Selection,
    max_timeout: u64,
    cancel: CancellationToken,
) -> RecoveryReport
where
    G: ClusterGateway,
{
    let selector = selection.label_selector();
    let namespace = selection.fixed_namespace();

    let listed = match gateway.list_pods(selector, namespace).await {
        Ok(listed) => listed,
        Err(e) => {
            sink.error(&format!("pod observer: initial list_pods failed: {e}"));
            return RecoveryReport {
                recovered: Vec::new(),
                unrecovered: Vec::new(),
                error: Some(e.to_string()),
            };
        }
    };

    let mut snapshot = PodsSnapshot::new(
        listed
            .first()
            .map(|p| p.resource_version.clone())
            .unwrap_or_default(),
    );
    for pod in &listed {
        if selection.matches(&pod.name, &pod.namespace) {
            snapshot.insert_initial(&pod.name, &pod.namespace);
        }
    }

    let mut watch = match gateway
        .watch_pods(&snapshot.resource_version, selector, namespace, max_timeout)
        .await
    {
        Ok(stream) => stream,
        Err(e) => {
            sink.error(&format!("pod observer: watch_pods failed: {e}"));
            return RecoveryReport {
                recovered: Vec::new(),
                unrecovered: Vec::new(),
                error: Some(e.to_string()),
            };
        }
    };

    let target_restored = snapshot.initial_pods.len();
    let mut restored_names: HashSet<String> = HashSet::new();
    let mut watch_error: Option<String> = None;

    loop {
        if cancel.is_cancelled() {
            break;
        }
        if target_restored > 0 && restored_names.len() >= target_restored {
            break;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = watch.next() => {
                match next {
                    None => break,
                    Some(Err(e)) => {
                        sink.error(&format!("pod observer: watch stream error: {e}"));
                        watch_error = Some(e.to_string());
                        break;
                    }
                    Some(Ok(event)) => {
                        handle_event(&mut snapshot, &selection, event, &mut restored_names);
                    }
                }
            }
        }
    }

    let mut report = snapshot.reduce();
    if let Some(err) = watch_error {
        report.error = Some(err);
        report.recovered.clear();
        report.unrecovered.clear();
    }
    report
}

fn handle_event(
    snapshot: &mut PodsSnapshot,
    selection: &Selection,
    event: chaoscope_gateway::WatchEvent,
    restored_names: &mut HashSet<String>,
) {
    let name = event.pod.name.clone();
    let namespace = event.pod.namespace.clone();
    if !selection.matches(&name, &namespace) {
        return;
    }

    match event.event_type {
        WatchEventType::Added => {
            snapshot.insert_added(&name, &namespace);
            snapshot.record_event(&name, PodEvent::new(PodStatus::Added, None));
        }
        WatchEventType::Modified => {
            if !snapshot.contains(&name) {
                return;
            }
            if event.pod.is_terminating() {
                snapshot.record_event(&name, PodEvent::new(PodStatus::DeletionScheduled, None));
            } else if event.pod.all_containers_ready() {
                snapshot.record_event(&name, PodEvent::new(PodStatus::Ready, None));
                restored_names.insert(name);
            } else {
                snapshot.record_event(&name, PodEvent::new(PodStatus::NotReady, None));
            }
        }
        WatchEventType::Deleted => {
            if !snapshot.contains(&name) {
                return;
            }
            snapshot.record_event(&name, PodEvent::new(PodStatus::Deleted, None));
        }
    }
}
