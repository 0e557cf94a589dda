//! `ArchiveVolume`: one chunk of an extracted directory.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveVolume {
    pub sequence: u32,
    pub local_path: String,
    pub remote_path: String,
}

impl ArchiveVolume {
    pub fn new(sequence: u32, local_path: impl Into<String>, remote_path: impl Into<String>) -> Self {
        Self {
            sequence,
            local_path: local_path.into(),
            remote_path: remote_path.into(),
        }
    }
}
