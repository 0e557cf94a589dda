//! `PodObserver`: the three pod-selection entry points — by label, by
//! namespace regex, or by name-and-namespace regex — each spawning one
//! background watch session.

use std::sync::Arc;

use chaoscope_gateway::ClusterGateway;
use chaoscope_sink::SafeSink;

use crate::selection::{Selection, SelectionError};
use crate::session::{spawn_session, SessionHandle};

pub struct PodObserver<G> {
    gateway: Arc<G>,
    sink: Arc<SafeSink>,
}

impl<G> PodObserver<G>
where
    G: ClusterGateway + 'static,
{
    pub fn new(gateway: Arc<G>, sink: Arc<SafeSink>) -> Self {
        Self { gateway, sink }
    }

    /// Select by a label selector, optionally pinned to one namespace.
    pub fn observe_by_label(
        &self,
        label_selector: impl Into<String>,
        namespace: Option<String>,
        max_timeout: u64,
    ) -> SessionHandle {
        let selection = Selection::by_label(label_selector, namespace);
        spawn_session(self.gateway.clone(), self.sink.clone(), selection, max_timeout)
    }

    /// Select by a namespace regex (anchored at its start), with an
    /// optional server-side label filter layered on top.
    pub fn observe_by_namespace_regex(
        &self,
        namespace_pattern: &str,
        label_selector: Option<String>,
        max_timeout: u64,
    ) -> Result<SessionHandle, SelectionError> {
        let selection = Selection::by_namespace_regex(namespace_pattern, label_selector)?;
        Ok(spawn_session(
            self.gateway.clone(),
            self.sink.clone(),
            selection,
            max_timeout,
        ))
    }

    /// Select by a (pod name, namespace) regex pair, both anchored at
    /// their start.
    pub fn observe_by_name_and_namespace_regex(
        &self,
        name_pattern: &str,
        namespace_pattern: &str,
        max_timeout: u64,
    ) -> Result<SessionHandle, SelectionError> {
        let selection = Selection::by_name_and_namespace_regex(name_pattern, namespace_pattern)?;
        Ok(spawn_session(
            self.gateway.clone(),
            self.sink.clone(),
            selection,
            max_timeout,
        ))
    }
}
