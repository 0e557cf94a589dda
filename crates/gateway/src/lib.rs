//! chaoscope-gateway: the minimal cluster API contract the observer,
//! extractor and report assembler consume, plus a production
//! implementation on top of `kube`.
//!
//! Intentionally thin: listing namespaces, applying manifests and other
//! general CRUD are out of scope — only the operations the core
//! subsystems actually call are exposed here.

#![forbid(unsafe_code)]

pub mod kube_gateway;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

pub use kube_gateway::KubeGateway;
pub use types::*;
