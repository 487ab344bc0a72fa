// rust/dispatcher-core/src/dispatcher/mod.rs

//! The dispatcher: one owner for every registry, exposing the RPC surface
//! as async methods.
//!
//! Each registry guards its own state. No method holds a registry lock
//! while calling into another registry, so requests never wait on each
//! other in a cycle.

mod tasks;
mod workers;

pub use tasks::TaskRegistry;
pub use workers::{WorkerRegistry, WorkerState};

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::DispatcherConfig;
use crate::dataset::{
    DataServiceMetadata, DatasetGraph, DatasetRegistry, GraphSplitProviderFactory,
    SplitProviderFactory,
};
use crate::error::{DispatcherError, Result};
use crate::job::{JobRegistry, SplitResult};
use crate::protocol::{
    DataServiceConfig, GetOrCreateJobRequest, SnapshotSplit, SnapshotStreamInfo, TaskDef,
    WorkerHeartbeatRequest, WorkerHeartbeatResponse, WorkerInfo,
};
use crate::snapshot::{DistributedSnapshotMetadata, SnapshotManager};
use crate::storage::{AsyncLocalStorage, AsyncStorageBackend};

pub struct Dispatcher {
    config: DispatcherConfig,
    engine: Arc<dyn SplitProviderFactory>,
    datasets: DatasetRegistry,
    jobs: JobRegistry,
    tasks: TaskRegistry,
    workers: WorkerRegistry,
    snapshots: SnapshotManager,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        storage: Arc<dyn AsyncStorageBackend>,
        engine: Arc<dyn SplitProviderFactory>,
    ) -> Self {
        let snapshots = SnapshotManager::new(storage, engine.clone(), &config.dispatcher);
        let workers =
            WorkerRegistry::new(Duration::from_millis(config.dispatcher.worker_timeout_ms));

        Self {
            config,
            engine,
            datasets: DatasetRegistry::new(),
            jobs: JobRegistry::new(),
            tasks: TaskRegistry::new(),
            workers,
            snapshots,
        }
    }

    /// Builds a dispatcher over local storage rooted at `storage.base_path`.
    pub async fn open(config: DispatcherConfig) -> Result<Self> {
        config.validate()?;
        let storage = AsyncLocalStorage::new(&config.storage).await?;
        Ok(Self::new(
            config,
            Arc::new(storage),
            Arc::new(GraphSplitProviderFactory),
        ))
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Resumes every snapshot recorded in the work directory.
    pub async fn recover(&self) -> Result<usize> {
        self.snapshots.recover().await
    }

    pub async fn register_dataset(
        &self,
        graph: DatasetGraph,
        metadata: DataServiceMetadata,
        dataset_id: Option<String>,
    ) -> Result<String> {
        let dataset_id = dataset_id.filter(|id| !id.is_empty());
        self.datasets.register(graph, metadata, dataset_id).await
    }

    pub async fn get_data_service_metadata(&self, dataset_id: &str) -> Result<DataServiceMetadata> {
        self.datasets.metadata(dataset_id).await
    }

    pub fn get_data_service_config(&self) -> DataServiceConfig {
        DataServiceConfig {
            deployment_mode: self.config.dispatcher.deployment_mode,
        }
    }

    pub async fn snapshot(
        &self,
        graph: DatasetGraph,
        directory: &Path,
        metadata: DistributedSnapshotMetadata,
    ) -> Result<()> {
        if directory.as_os_str().is_empty() {
            return Err(DispatcherError::invalid_argument(
                "Snapshot directory must not be empty",
            ));
        }
        self.snapshots.start(&graph, directory, metadata).await
    }

    pub async fn get_or_create_job(&self, request: &GetOrCreateJobRequest) -> Result<u64> {
        self.datasets.get(&request.dataset_id).await?;
        self.jobs.get_or_create_job(request).await
    }

    pub async fn get_or_create_iteration(&self, job_id: u64, repetition: u64) -> Result<u64> {
        let job = self.jobs.job(job_id).await?;
        let dataset = self.datasets.get(&job.dataset_id).await?;
        let engine = &self.engine;
        self.jobs
            .get_or_create_iteration(job_id, repetition, || {
                engine.split_providers(&dataset.graph)
            })
            .await
    }

    pub async fn get_split(
        &self,
        iteration_id: u64,
        repetition: u64,
        split_provider_index: usize,
    ) -> Result<SplitResult> {
        self.jobs
            .get_split(iteration_id, repetition, split_provider_index)
            .await
    }

    /// Handles a worker heartbeat.
    ///
    /// The worker is registered (or marked healthy again) first, then its
    /// snapshot progress is applied and streams are handed out, and finally
    /// iteration tasks are reconciled against `current_tasks`.
    pub async fn worker_heartbeat(
        &self,
        request: &WorkerHeartbeatRequest,
    ) -> Result<WorkerHeartbeatResponse> {
        let worker = request.worker_address.as_str();
        if worker.is_empty() {
            return Err(DispatcherError::invalid_argument(
                "Worker heartbeat requires a worker address",
            ));
        }

        self.workers.heartbeat(worker).await;
        let mut unhealthy = self.workers.unhealthy().await;
        unhealthy.remove(worker);

        let streams = self
            .snapshots
            .worker_heartbeat(worker, &request.snapshot_task_progress, &unhealthy)
            .await?;

        let iterations = self.jobs.iterations().await;
        let tasks = self.tasks.tasks_for_worker(worker, &iterations).await;

        let current: HashSet<u64> = request.current_tasks.iter().copied().collect();
        let known: HashSet<u64> = tasks.iter().map(|task| task.task_id).collect();

        let mut new_tasks: Vec<TaskDef> = tasks
            .into_iter()
            .filter(|task| !current.contains(&task.task_id))
            .map(TaskDef::Iteration)
            .collect();
        new_tasks.extend(streams.assigned.into_iter().map(TaskDef::Snapshot));

        let mut tasks_to_delete = Vec::new();
        for task_id in &request.current_tasks {
            if !known.contains(task_id) && !tasks_to_delete.contains(task_id) {
                tasks_to_delete.push(*task_id);
            }
        }

        tracing::debug!(
            worker = %worker,
            new_tasks = new_tasks.len(),
            tasks_to_delete = tasks_to_delete.len(),
            snapshots = streams.snapshots.len(),
            "Worker heartbeat"
        );

        Ok(WorkerHeartbeatResponse {
            new_tasks,
            tasks_to_delete,
            snapshots: streams.snapshots,
        })
    }

    pub async fn get_snapshot_split(
        &self,
        directory: &Path,
        stream_index: usize,
        source_index: usize,
    ) -> Result<SnapshotSplit> {
        self.snapshots
            .get_snapshot_split(directory, stream_index, source_index)
            .await
    }

    pub async fn get_workers(&self) -> Vec<WorkerInfo> {
        self.workers.list().await
    }

    pub async fn get_snapshot_streams(&self, directory: &Path) -> Result<Vec<SnapshotStreamInfo>> {
        self.snapshots.snapshot_streams(directory).await
    }

    /// Marks silent workers unhealthy so their streams can be reassigned.
    pub async fn check_worker_timeouts(&self) -> Vec<String> {
        let timed_out = self.workers.check_timeouts().await;
        for worker in &timed_out {
            tracing::warn!(worker = %worker, "Worker timed out");
        }
        timed_out
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::config::StorageConfig;
    use crate::job::ProcessingMode;
    use crate::protocol::SnapshotTaskProgress;

    async fn dispatcher(dir: &TempDir, worker_timeout_ms: u64) -> Dispatcher {
        let mut config = DispatcherConfig::default();
        config.storage = StorageConfig {
            base_path: dir.path().to_path_buf(),
            ..Default::default()
        };
        config.dispatcher.worker_timeout_ms = worker_timeout_ms;
        config.dispatcher.heartbeat_interval_ms = worker_timeout_ms.min(5_000);
        Dispatcher::open(config).await.unwrap()
    }

    async fn register_range(dispatcher: &Dispatcher, n: i64) -> String {
        dispatcher
            .register_dataset(
                DatasetGraph::range(n).unwrap(),
                DataServiceMetadata::default(),
                None,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_job_requires_registered_dataset() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir, 30_000).await;

        let request = GetOrCreateJobRequest {
            dataset_id: "missing".to_string(),
            ..Default::default()
        };
        let err = dispatcher.get_or_create_job(&request).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Dataset id missing not found");
    }

    #[tokio::test]
    async fn test_heartbeat_reconciles_tasks() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir, 30_000).await;
        let dataset_id = register_range(&dispatcher, 4).await;

        let job_id = dispatcher
            .get_or_create_job(&GetOrCreateJobRequest {
                dataset_id,
                ..Default::default()
            })
            .await
            .unwrap();
        dispatcher.get_or_create_iteration(job_id, 0).await.unwrap();

        let response = dispatcher
            .worker_heartbeat(&WorkerHeartbeatRequest::new("w0"))
            .await
            .unwrap();
        assert_eq!(response.new_tasks.len(), 1);
        let task_id = match &response.new_tasks[0] {
            TaskDef::Iteration(task) => task.task_id,
            other => panic!("unexpected task {other:?}"),
        };

        // A worker already running the task gets nothing new; unknown ids are
        // returned for deletion.
        let response = dispatcher
            .worker_heartbeat(&WorkerHeartbeatRequest {
                worker_address: "w0".to_string(),
                current_tasks: vec![task_id, 42, 42],
                snapshot_task_progress: Vec::new(),
            })
            .await
            .unwrap();
        assert!(response.new_tasks.is_empty());
        assert_eq!(response.tasks_to_delete, vec![42]);
    }

    #[tokio::test]
    async fn test_dynamic_iteration_serves_splits() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir, 30_000).await;
        let dataset_id = register_range(&dispatcher, 2).await;

        let job_id = dispatcher
            .get_or_create_job(&GetOrCreateJobRequest {
                dataset_id,
                processing_mode: ProcessingMode::dynamic(),
                ..Default::default()
            })
            .await
            .unwrap();
        let iteration_id = dispatcher.get_or_create_iteration(job_id, 0).await.unwrap();

        let mut splits = Vec::new();
        loop {
            let result = dispatcher.get_split(iteration_id, 0, 0).await.unwrap();
            if result.end_of_splits {
                break;
            }
            splits.push(result.split.unwrap());
        }
        assert_eq!(splits.len(), 2);
        assert_eq!(splits[1].as_ref(), 1i64.to_le_bytes());
    }

    #[tokio::test]
    async fn test_timed_out_worker_stream_is_reassigned() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir, 10).await;
        let snapshot_dir = dir.path().join("snap");

        dispatcher
            .snapshot(
                DatasetGraph::range(10).unwrap(),
                &snapshot_dir,
                DistributedSnapshotMetadata::default(),
            )
            .await
            .unwrap();

        let first = dispatcher
            .worker_heartbeat(&WorkerHeartbeatRequest::new("w0"))
            .await
            .unwrap();
        assert_eq!(first.snapshots.len(), 1);
        assert_eq!(first.snapshots[0].stream_index, 0);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(dispatcher.check_worker_timeouts().await, vec!["w0".to_string()]);

        let second = dispatcher
            .worker_heartbeat(&WorkerHeartbeatRequest::new("w1"))
            .await
            .unwrap();
        assert_eq!(second.snapshots.len(), 1);
        assert_eq!(second.snapshots[0].stream_index, 0);

        let streams = dispatcher.get_snapshot_streams(&snapshot_dir).await.unwrap();
        assert_eq!(streams[0].owner.as_deref(), Some("w1"));

        // The original owner comes back: its progress for the stream is ignored.
        let back = dispatcher
            .worker_heartbeat(&WorkerHeartbeatRequest {
                worker_address: "w0".to_string(),
                current_tasks: Vec::new(),
                snapshot_task_progress: vec![SnapshotTaskProgress {
                    directory: snapshot_dir.clone(),
                    stream_index: 0,
                    completed: true,
                }],
            })
            .await
            .unwrap();
        assert!(back.snapshots.iter().all(|s| s.stream_index != 0));

        let workers = dispatcher.get_workers().await;
        assert_eq!(workers.len(), 2);
        assert!(workers.iter().all(|w| w.healthy));
    }

    #[tokio::test]
    async fn test_empty_snapshot_directory_rejected() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir, 30_000).await;

        let err = dispatcher
            .snapshot(
                DatasetGraph::range(1).unwrap(),
                Path::new(""),
                DistributedSnapshotMetadata::default(),
            )
            .await
            .unwrap_err();
        assert!(err.is_invalid_argument());
    }
}
