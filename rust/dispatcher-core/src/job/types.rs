// rust/dispatcher-core/src/job/types.rs

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a job's input is divided among workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShardingPolicy {
    /// Every worker processes the full dataset.
    #[default]
    Off,
    /// Workers pull splits from the dispatcher as they go.
    Dynamic,
    File,
    Data,
    FileOrData,
    Hint,
}

impl ShardingPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Dynamic => "DYNAMIC",
            Self::File => "FILE",
            Self::Data => "DATA",
            Self::FileOrData => "FILE_OR_DATA",
            Self::Hint => "HINT",
        }
    }
}

/// Processing mode of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessingMode {
    pub sharding_policy: ShardingPolicy,
}

impl ProcessingMode {
    pub fn new(sharding_policy: ShardingPolicy) -> Self {
        Self { sharding_policy }
    }

    pub fn off() -> Self {
        Self::new(ShardingPolicy::Off)
    }

    pub fn dynamic() -> Self {
        Self::new(ShardingPolicy::Dynamic)
    }

    pub fn is_dynamic(&self) -> bool {
        self.sharding_policy == ShardingPolicy::Dynamic
    }
}

// Text form of the mode as it appears in mismatch errors; the default
// policy renders as nothing.
impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sharding_policy {
            ShardingPolicy::Off => Ok(()),
            policy => write!(f, "sharding_policy: {}", policy.as_str()),
        }
    }
}

/// Which workers a job's consumers should read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetWorkers {
    #[default]
    Auto,
    Any,
    Local,
}

/// A dataset-processing job.
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: u64,
    pub dataset_id: String,
    pub job_name: Option<String>,
    pub processing_mode: ProcessingMode,
    /// Fixed number of round-robin consumers, if any.
    pub num_consumers: Option<u64>,
    pub use_cross_trainer_cache: bool,
    pub target_workers: TargetWorkers,
    pub created_at: DateTime<Utc>,
}

/// One repetition of a job.
#[derive(Debug, Clone)]
pub struct Iteration {
    pub iteration_id: u64,
    pub job_id: u64,
    pub repetition: u64,
    pub created_at: DateTime<Utc>,
}

/// Result of pulling a split for a dynamically sharded iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitResult {
    pub split: Option<bytes::Bytes>,
    pub end_of_splits: bool,
}

impl SplitResult {
    pub fn end_of_splits() -> Self {
        Self {
            split: None,
            end_of_splits: true,
        }
    }
}
