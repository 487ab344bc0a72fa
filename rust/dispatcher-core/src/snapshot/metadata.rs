// rust/dispatcher-core/src/snapshot/metadata.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DispatcherError, Result};

/// Metadata supplied by the client that starts a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributedSnapshotMetadata {
    /// Serialized element structure, opaque to the dispatcher.
    pub element_spec: Vec<u8>,
    /// Compression codec name used for committed chunks.
    pub compression: String,
}

/// Contents of `snapshot.metadata`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub distributed: DistributedSnapshotMetadata,
    pub num_sources: u64,
    pub created_at: DateTime<Utc>,
}

impl SnapshotMetadata {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| {
            DispatcherError::serialization_with_source("failed to encode snapshot metadata", e)
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| {
            DispatcherError::serialization_with_source("failed to decode snapshot metadata", e)
        })
    }
}
