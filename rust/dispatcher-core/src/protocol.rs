// rust/dispatcher-core/src/protocol.rs

//! Request and response types of the dispatcher RPC surface.
//!
//! These are the types the [`Dispatcher`](crate::Dispatcher) and every
//! [`DispatcherClient`](crate::DispatcherClient) speak. With the `grpc`
//! feature, conversions to and from the generated protobuf messages live
//! here as well.

use std::path::PathBuf;

use bytes::Bytes;

use crate::config::DeploymentMode;
use crate::job::{ProcessingMode, TargetWorkers};

/// Parameters of `GetOrCreateJob`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetOrCreateJobRequest {
    pub dataset_id: String,
    pub processing_mode: ProcessingMode,
    /// Jobs with a name are shared by every request using that name.
    pub job_name: Option<String>,
    pub num_consumers: Option<u64>,
    pub use_cross_trainer_cache: bool,
    pub target_workers: TargetWorkers,
}

/// Data service settings reported to clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataServiceConfig {
    pub deployment_mode: DeploymentMode,
}

/// A worker's share of an ordinary iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationTaskDef {
    pub task_id: u64,
    pub iteration_id: u64,
    pub job_id: u64,
    pub dataset_id: String,
    pub repetition: u64,
    pub processing_mode: ProcessingMode,
    pub num_consumers: Option<u64>,
    pub use_cross_trainer_cache: bool,
    pub worker_address: String,
}

/// A snapshot stream owned by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotTaskDef {
    pub directory: PathBuf,
    pub stream_index: usize,
    pub num_sources: usize,
    pub use_cross_trainer_cache: bool,
}

/// Work handed to a worker through a heartbeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskDef {
    Iteration(IterationTaskDef),
    Snapshot(SnapshotTaskDef),
}

impl TaskDef {
    pub fn use_cross_trainer_cache(&self) -> bool {
        match self {
            Self::Iteration(task) => task.use_cross_trainer_cache,
            Self::Snapshot(task) => task.use_cross_trainer_cache,
        }
    }
}

/// Progress a worker reports for one of its snapshot streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotTaskProgress {
    pub directory: PathBuf,
    pub stream_index: usize,
    pub completed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerHeartbeatRequest {
    pub worker_address: String,
    /// Ids of the iteration tasks the worker is running.
    pub current_tasks: Vec<u64>,
    pub snapshot_task_progress: Vec<SnapshotTaskProgress>,
}

impl WorkerHeartbeatRequest {
    pub fn new(worker_address: impl Into<String>) -> Self {
        Self {
            worker_address: worker_address.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerHeartbeatResponse {
    pub new_tasks: Vec<TaskDef>,
    /// Ids from `current_tasks` the worker should stop.
    pub tasks_to_delete: Vec<u64>,
    /// Every unfinished snapshot stream the worker owns.
    pub snapshots: Vec<SnapshotTaskDef>,
}

/// Response of `GetSnapshotSplit`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotSplit {
    pub split: Option<Bytes>,
    pub local_split_index: u64,
    pub end_of_splits: bool,
}

impl SnapshotSplit {
    pub fn end_of_splits() -> Self {
        Self {
            split: None,
            local_split_index: 0,
            end_of_splits: true,
        }
    }
}

/// One stream of a snapshot as seen by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotStreamInfo {
    pub stream_index: usize,
    pub owner: Option<String>,
    pub done: bool,
}

/// Worker known to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub worker_address: String,
    pub healthy: bool,
    pub registered_at_ms: i64,
    pub last_heartbeat_ms: i64,
}

#[cfg(feature = "grpc")]
mod convert {
    use super::*;
    use crate::dataset::{Cardinality, Compression, DataServiceMetadata};
    use crate::error::{DispatcherError, Result};
    use crate::job::ShardingPolicy;
    use crate::proto;
    use crate::snapshot::DistributedSnapshotMetadata;

    impl From<proto::Compression> for Compression {
        fn from(compression: proto::Compression) -> Self {
            match compression {
                proto::Compression::Unspecified => Self::Unspecified,
                proto::Compression::Off => Self::Off,
                proto::Compression::Snappy => Self::Snappy,
            }
        }
    }

    impl From<Compression> for proto::Compression {
        fn from(compression: Compression) -> Self {
            match compression {
                Compression::Unspecified => Self::Unspecified,
                Compression::Off => Self::Off,
                Compression::Snappy => Self::Snappy,
            }
        }
    }

    impl From<proto::DataServiceMetadata> for DataServiceMetadata {
        fn from(metadata: proto::DataServiceMetadata) -> Self {
            Self {
                compression: metadata.compression().into(),
                element_spec: metadata.element_spec,
                cardinality: Cardinality::from_i64(metadata.cardinality),
            }
        }
    }

    impl From<DataServiceMetadata> for proto::DataServiceMetadata {
        fn from(metadata: DataServiceMetadata) -> Self {
            Self {
                element_spec: metadata.element_spec,
                compression: proto::Compression::from(metadata.compression).into(),
                cardinality: metadata.cardinality.to_i64(),
            }
        }
    }

    impl From<proto::DeploymentMode> for DeploymentMode {
        fn from(mode: proto::DeploymentMode) -> Self {
            match mode {
                proto::DeploymentMode::Unspecified | proto::DeploymentMode::Colocated => {
                    Self::Colocated
                }
                proto::DeploymentMode::Remote => Self::Remote,
                proto::DeploymentMode::Hybrid => Self::Hybrid,
            }
        }
    }

    impl From<DeploymentMode> for proto::DeploymentMode {
        fn from(mode: DeploymentMode) -> Self {
            match mode {
                DeploymentMode::Colocated => Self::Colocated,
                DeploymentMode::Remote => Self::Remote,
                DeploymentMode::Hybrid => Self::Hybrid,
            }
        }
    }

    impl From<proto::ShardingPolicy> for ShardingPolicy {
        fn from(policy: proto::ShardingPolicy) -> Self {
            match policy {
                proto::ShardingPolicy::Off => Self::Off,
                proto::ShardingPolicy::Dynamic => Self::Dynamic,
                proto::ShardingPolicy::File => Self::File,
                proto::ShardingPolicy::Data => Self::Data,
                proto::ShardingPolicy::FileOrData => Self::FileOrData,
                proto::ShardingPolicy::Hint => Self::Hint,
            }
        }
    }

    impl From<ShardingPolicy> for proto::ShardingPolicy {
        fn from(policy: ShardingPolicy) -> Self {
            match policy {
                ShardingPolicy::Off => Self::Off,
                ShardingPolicy::Dynamic => Self::Dynamic,
                ShardingPolicy::File => Self::File,
                ShardingPolicy::Data => Self::Data,
                ShardingPolicy::FileOrData => Self::FileOrData,
                ShardingPolicy::Hint => Self::Hint,
            }
        }
    }

    impl From<proto::ProcessingMode> for ProcessingMode {
        fn from(mode: proto::ProcessingMode) -> Self {
            Self::new(mode.sharding_policy().into())
        }
    }

    impl From<ProcessingMode> for proto::ProcessingMode {
        fn from(mode: ProcessingMode) -> Self {
            Self {
                sharding_policy: proto::ShardingPolicy::from(mode.sharding_policy).into(),
            }
        }
    }

    impl From<proto::TargetWorkers> for TargetWorkers {
        fn from(target: proto::TargetWorkers) -> Self {
            match target {
                proto::TargetWorkers::Auto => Self::Auto,
                proto::TargetWorkers::Any => Self::Any,
                proto::TargetWorkers::Local => Self::Local,
            }
        }
    }

    impl From<TargetWorkers> for proto::TargetWorkers {
        fn from(target: TargetWorkers) -> Self {
            match target {
                TargetWorkers::Auto => Self::Auto,
                TargetWorkers::Any => Self::Any,
                TargetWorkers::Local => Self::Local,
            }
        }
    }

    impl From<proto::DistributedSnapshotMetadata> for DistributedSnapshotMetadata {
        fn from(metadata: proto::DistributedSnapshotMetadata) -> Self {
            Self {
                element_spec: metadata.element_spec,
                compression: metadata.compression,
            }
        }
    }

    impl From<DistributedSnapshotMetadata> for proto::DistributedSnapshotMetadata {
        fn from(metadata: DistributedSnapshotMetadata) -> Self {
            Self {
                element_spec: metadata.element_spec,
                compression: metadata.compression,
            }
        }
    }

    impl From<proto::GetOrCreateJobRequest> for GetOrCreateJobRequest {
        fn from(request: proto::GetOrCreateJobRequest) -> Self {
            Self {
                target_workers: request.target_workers().into(),
                processing_mode: request.processing_mode.map(Into::into).unwrap_or_default(),
                dataset_id: request.dataset_id,
                job_name: request.job_name.filter(|name| !name.is_empty()),
                num_consumers: request.num_consumers,
                use_cross_trainer_cache: request.use_cross_trainer_cache,
            }
        }
    }

    impl From<GetOrCreateJobRequest> for proto::GetOrCreateJobRequest {
        fn from(request: GetOrCreateJobRequest) -> Self {
            Self {
                dataset_id: request.dataset_id,
                processing_mode: Some(request.processing_mode.into()),
                job_name: request.job_name,
                num_consumers: request.num_consumers,
                use_cross_trainer_cache: request.use_cross_trainer_cache,
                target_workers: proto::TargetWorkers::from(request.target_workers).into(),
            }
        }
    }

    impl From<proto::IterationTaskDef> for IterationTaskDef {
        fn from(task: proto::IterationTaskDef) -> Self {
            Self {
                task_id: task.task_id,
                iteration_id: task.iteration_id,
                job_id: task.job_id,
                dataset_id: task.dataset_id,
                repetition: task.repetition,
                processing_mode: task.processing_mode.map(Into::into).unwrap_or_default(),
                num_consumers: task.num_consumers,
                use_cross_trainer_cache: task.use_cross_trainer_cache,
                worker_address: task.worker_address,
            }
        }
    }

    impl From<IterationTaskDef> for proto::IterationTaskDef {
        fn from(task: IterationTaskDef) -> Self {
            Self {
                task_id: task.task_id,
                iteration_id: task.iteration_id,
                job_id: task.job_id,
                dataset_id: task.dataset_id,
                repetition: task.repetition,
                processing_mode: Some(task.processing_mode.into()),
                num_consumers: task.num_consumers,
                use_cross_trainer_cache: task.use_cross_trainer_cache,
                worker_address: task.worker_address,
            }
        }
    }

    impl From<proto::SnapshotTaskDef> for SnapshotTaskDef {
        fn from(task: proto::SnapshotTaskDef) -> Self {
            Self {
                directory: PathBuf::from(task.directory),
                stream_index: task.stream_index as usize,
                num_sources: task.num_sources as usize,
                use_cross_trainer_cache: task.use_cross_trainer_cache,
            }
        }
    }

    impl From<SnapshotTaskDef> for proto::SnapshotTaskDef {
        fn from(task: SnapshotTaskDef) -> Self {
            Self {
                directory: task.directory.to_string_lossy().into_owned(),
                stream_index: task.stream_index as u64,
                num_sources: task.num_sources as u64,
                use_cross_trainer_cache: task.use_cross_trainer_cache,
            }
        }
    }

    impl TryFrom<proto::TaskDef> for TaskDef {
        type Error = DispatcherError;

        fn try_from(task: proto::TaskDef) -> Result<Self> {
            match task.task {
                Some(proto::task_def::Task::Iteration(task)) => Ok(Self::Iteration(task.into())),
                Some(proto::task_def::Task::Snapshot(task)) => Ok(Self::Snapshot(task.into())),
                None => Err(DispatcherError::serialization("task definition has no task")),
            }
        }
    }

    impl From<TaskDef> for proto::TaskDef {
        fn from(task: TaskDef) -> Self {
            let task = match task {
                TaskDef::Iteration(task) => proto::task_def::Task::Iteration(task.into()),
                TaskDef::Snapshot(task) => proto::task_def::Task::Snapshot(task.into()),
            };
            Self { task: Some(task) }
        }
    }

    impl From<proto::SnapshotTaskProgress> for SnapshotTaskProgress {
        fn from(progress: proto::SnapshotTaskProgress) -> Self {
            Self {
                directory: PathBuf::from(progress.directory),
                stream_index: progress.stream_index as usize,
                completed: progress.completed,
            }
        }
    }

    impl From<SnapshotTaskProgress> for proto::SnapshotTaskProgress {
        fn from(progress: SnapshotTaskProgress) -> Self {
            Self {
                directory: progress.directory.to_string_lossy().into_owned(),
                stream_index: progress.stream_index as u64,
                completed: progress.completed,
            }
        }
    }

    impl From<proto::WorkerHeartbeatRequest> for WorkerHeartbeatRequest {
        fn from(request: proto::WorkerHeartbeatRequest) -> Self {
            Self {
                worker_address: request.worker_address,
                current_tasks: request.current_tasks,
                snapshot_task_progress: request
                    .snapshot_task_progress
                    .into_iter()
                    .map(Into::into)
                    .collect(),
            }
        }
    }

    impl From<WorkerHeartbeatRequest> for proto::WorkerHeartbeatRequest {
        fn from(request: WorkerHeartbeatRequest) -> Self {
            Self {
                worker_address: request.worker_address,
                current_tasks: request.current_tasks,
                snapshot_task_progress: request
                    .snapshot_task_progress
                    .into_iter()
                    .map(Into::into)
                    .collect(),
            }
        }
    }

    impl TryFrom<proto::WorkerHeartbeatResponse> for WorkerHeartbeatResponse {
        type Error = DispatcherError;

        fn try_from(response: proto::WorkerHeartbeatResponse) -> Result<Self> {
            Ok(Self {
                new_tasks: response
                    .new_tasks
                    .into_iter()
                    .map(TryInto::try_into)
                    .collect::<Result<_>>()?,
                tasks_to_delete: response.tasks_to_delete,
                snapshots: response.snapshots.into_iter().map(Into::into).collect(),
            })
        }
    }

    impl From<WorkerHeartbeatResponse> for proto::WorkerHeartbeatResponse {
        fn from(response: WorkerHeartbeatResponse) -> Self {
            Self {
                new_tasks: response.new_tasks.into_iter().map(Into::into).collect(),
                tasks_to_delete: response.tasks_to_delete,
                snapshots: response.snapshots.into_iter().map(Into::into).collect(),
            }
        }
    }

    impl From<proto::GetSnapshotSplitResponse> for SnapshotSplit {
        fn from(response: proto::GetSnapshotSplitResponse) -> Self {
            Self {
                split: response.split.map(Bytes::from),
                local_split_index: response.local_split_index,
                end_of_splits: response.end_of_splits,
            }
        }
    }

    impl From<SnapshotSplit> for proto::GetSnapshotSplitResponse {
        fn from(split: SnapshotSplit) -> Self {
            Self {
                split: split.split.map(|b| b.to_vec()),
                local_split_index: split.local_split_index,
                end_of_splits: split.end_of_splits,
            }
        }
    }

    impl From<proto::SnapshotStreamInfo> for SnapshotStreamInfo {
        fn from(info: proto::SnapshotStreamInfo) -> Self {
            Self {
                stream_index: info.stream_index as usize,
                owner: info.owner,
                done: info.done,
            }
        }
    }

    impl From<SnapshotStreamInfo> for proto::SnapshotStreamInfo {
        fn from(info: SnapshotStreamInfo) -> Self {
            Self {
                stream_index: info.stream_index as u64,
                owner: info.owner,
                done: info.done,
            }
        }
    }

    impl From<proto::WorkerInfo> for WorkerInfo {
        fn from(info: proto::WorkerInfo) -> Self {
            Self {
                worker_address: info.worker_address,
                healthy: info.healthy,
                registered_at_ms: info.registered_at_ms,
                last_heartbeat_ms: info.last_heartbeat_ms,
            }
        }
    }

    impl From<WorkerInfo> for proto::WorkerInfo {
        fn from(info: WorkerInfo) -> Self {
            Self {
                worker_address: info.worker_address,
                healthy: info.healthy,
                registered_at_ms: info.registered_at_ms,
                last_heartbeat_ms: info.last_heartbeat_ms,
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_unset_enums_take_defaults() {
            let request = GetOrCreateJobRequest::from(proto::GetOrCreateJobRequest {
                dataset_id: "ds".to_string(),
                job_name: Some(String::new()),
                ..Default::default()
            });

            assert_eq!(request.processing_mode, ProcessingMode::off());
            assert_eq!(request.target_workers, TargetWorkers::Auto);
            assert!(request.job_name.is_none());

            let mode = DeploymentMode::from(proto::DeploymentMode::Unspecified);
            assert_eq!(mode, DeploymentMode::Colocated);
        }

        #[test]
        fn test_empty_task_def_is_rejected() {
            let result = TaskDef::try_from(proto::TaskDef { task: None });
            assert!(result.is_err());
        }

        #[test]
        fn test_metadata_cardinality_sentinels() {
            let metadata = DataServiceMetadata::from(proto::DataServiceMetadata {
                element_spec: vec![1],
                compression: proto::Compression::Snappy.into(),
                cardinality: -1,
            });
            assert_eq!(metadata.cardinality, Cardinality::Infinite);
            assert_eq!(metadata.compression, Compression::Snappy);

            let wire = proto::DataServiceMetadata::from(DataServiceMetadata {
                cardinality: Cardinality::Unknown,
                ..Default::default()
            });
            assert_eq!(wire.cardinality, -2);
        }
    }
}
