//! chaoscope-core: shared data model, configuration and scrubbing helpers.
//!
//! No I/O lives here. Every other chaoscope crate depends on this one for
//! the types that flow between the observer, extractor, publisher and
//! report assembler.

#![forbid(unsafe_code)]

pub mod config;
pub mod pod;
pub mod report;
pub mod scrub;
pub mod volume;

pub mod prelude {
    pub use crate::config::{Config, ConfigError};
    pub use crate::pod::{
        AffectedPod, MonitoredPod, PodEvent, PodStatus, PodsSnapshot, RecoveryReport,
    };
    pub use crate::report::{NodeInfo, RunReport, ScenarioRecord, Taint};
    pub use crate::scrub::scrub_secrets;
    pub use crate::volume::ArchiveVolume;
}
