// rust/dispatcher-core/tests/dispatcher_client.rs

//! End-to-end tests through the `DispatcherClient` surface.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use dispatcher_core::config::StorageConfig;
use dispatcher_core::protocol::{
    GetOrCreateJobRequest, SnapshotTaskProgress, TaskDef, WorkerHeartbeatRequest,
};
use dispatcher_core::{
    Cardinality, Compression, DataServiceMetadata, DatasetGraph, DeploymentMode, Dispatcher,
    DispatcherClient, DispatcherConfig, DistributedSnapshotMetadata, LocalDispatcherClient,
    ProcessingMode,
};
use tempfile::TempDir;

async fn client_with(
    dir: &TempDir,
    configure: impl FnOnce(&mut DispatcherConfig),
) -> LocalDispatcherClient {
    let mut config = DispatcherConfig::default();
    config.storage = StorageConfig {
        base_path: dir.path().join("storage"),
        ..Default::default()
    };
    configure(&mut config);
    let dispatcher = Dispatcher::open(config).await.unwrap();
    LocalDispatcherClient::new(Arc::new(dispatcher))
}

async fn client(dir: &TempDir) -> LocalDispatcherClient {
    client_with(dir, |_| {}).await
}

fn metadata(cardinality: Cardinality) -> DataServiceMetadata {
    DataServiceMetadata {
        element_spec: b"int64 scalar".to_vec(),
        compression: Compression::Snappy,
        cardinality,
    }
}

fn named_job(dataset_id: &str, cache: bool) -> GetOrCreateJobRequest {
    GetOrCreateJobRequest {
        dataset_id: dataset_id.to_string(),
        processing_mode: ProcessingMode::off(),
        job_name: Some("train".to_string()),
        num_consumers: None,
        use_cross_trainer_cache: cache,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_register_dataset_and_read_metadata() {
    let dir = TempDir::new().unwrap();
    let client = client(&dir).await;

    let dataset_id = client
        .register_dataset(DatasetGraph::range(10).unwrap(), metadata(Cardinality::Known(10)), None)
        .await
        .unwrap();

    let read = client.get_data_service_metadata(&dataset_id).await.unwrap();
    assert_eq!(read, metadata(Cardinality::Known(10)));

    // Generated ids are content derived.
    let again = client
        .register_dataset(DatasetGraph::range(10).unwrap(), metadata(Cardinality::Known(10)), None)
        .await
        .unwrap();
    assert_eq!(again, dataset_id);
}

#[tokio::test]
async fn test_metadata_of_unknown_dataset() {
    let dir = TempDir::new().unwrap();
    let client = client(&dir).await;

    let err = client.get_data_service_metadata("not-found").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(err.to_string().contains("not-found"));
}

#[tokio::test]
async fn test_requested_dataset_id_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let client = client(&dir).await;

    let graph = DatasetGraph::range(5).unwrap();
    let first = client
        .register_dataset(graph.clone(), metadata(Cardinality::Known(5)), Some("ds".to_string()))
        .await
        .unwrap();
    let second = client
        .register_dataset(graph.clone(), metadata(Cardinality::Known(5)), Some("ds".to_string()))
        .await
        .unwrap();
    assert_eq!(first, "ds");
    assert_eq!(second, "ds");

    let err = client
        .register_dataset(graph, metadata(Cardinality::Infinite), Some("ds".to_string()))
        .await
        .unwrap_err();
    assert!(err.is_invalid_argument());
    assert!(err.to_string().contains("ds"));
}

#[tokio::test]
async fn test_data_service_config_reports_deployment_mode() {
    let dir = TempDir::new().unwrap();
    let client = client(&dir).await;
    let config = client.get_data_service_config().await.unwrap();
    assert_eq!(config.deployment_mode, DeploymentMode::Colocated);

    let dir = TempDir::new().unwrap();
    let client = client_with(&dir, |c| c.dispatcher.deployment_mode = DeploymentMode::Remote).await;
    let config = client.get_data_service_config().await.unwrap();
    assert_eq!(config.deployment_mode, DeploymentMode::Remote);
}

#[tokio::test]
async fn test_snapshot_writes_layout() {
    let dir = TempDir::new().unwrap();
    let client = client(&dir).await;
    let snapshot_dir = dir.path().join("snapshots").join("a");

    client
        .snapshot(
            DatasetGraph::range(3).unwrap(),
            &snapshot_dir,
            DistributedSnapshotMetadata::default(),
        )
        .await
        .unwrap();

    assert!(snapshot_dir.join("snapshot.metadata").is_file());
    assert!(snapshot_dir.join("dataset_def.proto").is_file());
    assert!(snapshot_dir.join("committed_chunks").is_dir());

    let err = client
        .snapshot(
            DatasetGraph::range(3).unwrap(),
            &snapshot_dir,
            DistributedSnapshotMetadata::default(),
        )
        .await
        .unwrap_err();
    assert!(err.is_invalid_argument());
    assert!(err.to_string().contains("already started"));
}

#[tokio::test]
async fn test_heartbeat_assigns_first_stream_of_every_snapshot() {
    let dir = TempDir::new().unwrap();
    let client = client(&dir).await;

    let mut directories = HashSet::new();
    for name in ["a", "b", "c"] {
        let directory = dir.path().join("snapshots").join(name);
        client
            .snapshot(
                DatasetGraph::range(100).unwrap(),
                &directory,
                DistributedSnapshotMetadata::default(),
            )
            .await
            .unwrap();
        directories.insert(directory);
    }

    let response = client
        .worker_heartbeat(WorkerHeartbeatRequest::new("worker-0:7000"))
        .await
        .unwrap();

    assert_eq!(response.snapshots.len(), 3);
    for snapshot in &response.snapshots {
        assert_eq!(snapshot.stream_index, 0);
        assert!(directories.contains(&snapshot.directory));
        assert!(!snapshot.use_cross_trainer_cache);
    }

    let snapshot_tasks = response
        .new_tasks
        .iter()
        .filter(|task| matches!(task, TaskDef::Snapshot(_)))
        .count();
    assert_eq!(snapshot_tasks, 3);

    // A repeated heartbeat reports the same streams and assigns nothing new.
    let again = client
        .worker_heartbeat(WorkerHeartbeatRequest::new("worker-0:7000"))
        .await
        .unwrap();
    assert_eq!(again.snapshots.len(), 3);
    assert!(again.new_tasks.is_empty());
}

#[tokio::test]
async fn test_snapshot_split_for_assigned_stream() {
    let dir = TempDir::new().unwrap();
    let client = client(&dir).await;
    let directory = dir.path().join("snap");

    client
        .snapshot(
            DatasetGraph::range(4).unwrap(),
            &directory,
            DistributedSnapshotMetadata::default(),
        )
        .await
        .unwrap();
    let response = client
        .worker_heartbeat(WorkerHeartbeatRequest::new("worker-0"))
        .await
        .unwrap();
    let stream = &response.snapshots[0];

    let split = client
        .get_snapshot_split(&stream.directory, stream.stream_index, 0)
        .await
        .unwrap();
    assert!(!split.end_of_splits);
    assert!(!split.split.as_ref().unwrap().is_empty());
    assert_eq!(split.local_split_index, 0);

    assert!(directory
        .join("streams/stream_0/splits/source_0/split_0_0")
        .is_file());
}

#[tokio::test]
async fn test_named_job_reuse_and_mismatch() {
    let dir = TempDir::new().unwrap();
    let client = client(&dir).await;
    let dataset_id = client
        .register_dataset(DatasetGraph::range(8).unwrap(), metadata(Cardinality::Known(8)), None)
        .await
        .unwrap();

    let first = client.get_or_create_job(named_job(&dataset_id, false)).await.unwrap();
    let second = client.get_or_create_job(named_job(&dataset_id, false)).await.unwrap();
    assert_eq!(first, second);

    let mut different = named_job(&dataset_id, false);
    different.processing_mode = ProcessingMode::dynamic();
    let err = client.get_or_create_job(different).await.unwrap_err();
    assert!(err.is_invalid_argument());

    let message = err.to_string();
    assert!(message.contains("Tried to create job with name train"));
    assert!(message.contains("Existing processing mode: <>"));
    assert!(message.contains("got <sharding_policy: DYNAMIC>"));
    assert!(message.contains("Existing cross-trainer cache: <disabled>; got <disabled>"));

    let err = client
        .get_or_create_job(named_job(&dataset_id, true))
        .await
        .unwrap_err();
    assert!(err
        .to_string()
        .contains("Existing cross-trainer cache: <disabled>; got <enabled>"));
}

#[tokio::test]
async fn test_iterations_are_memoized_per_repetition() {
    let dir = TempDir::new().unwrap();
    let client = client(&dir).await;
    let dataset_id = client
        .register_dataset(DatasetGraph::range(8).unwrap(), metadata(Cardinality::Known(8)), None)
        .await
        .unwrap();
    let job_id = client.get_or_create_job(named_job(&dataset_id, false)).await.unwrap();

    let first = client.get_or_create_iteration(job_id, 0).await.unwrap();
    let again = client.get_or_create_iteration(job_id, 0).await.unwrap();
    let next = client.get_or_create_iteration(job_id, 1).await.unwrap();
    assert_eq!(first, again);
    assert_ne!(first, next);

    let err = client.get_or_create_iteration(job_id + 1000, 0).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_cross_trainer_cache_reaches_every_task() {
    let dir = TempDir::new().unwrap();
    let client = client(&dir).await;
    let dataset_id = client
        .register_dataset(DatasetGraph::infinite().unwrap(), metadata(Cardinality::Infinite), None)
        .await
        .unwrap();

    let job_id = client
        .get_or_create_job(GetOrCreateJobRequest {
            dataset_id,
            job_name: Some("shared".to_string()),
            use_cross_trainer_cache: true,
            ..Default::default()
        })
        .await
        .unwrap();
    client.get_or_create_iteration(job_id, 0).await.unwrap();
    client.get_or_create_iteration(job_id, 1).await.unwrap();

    for worker in ["worker-0", "worker-1"] {
        let response = client
            .worker_heartbeat(WorkerHeartbeatRequest::new(worker))
            .await
            .unwrap();
        assert_eq!(response.new_tasks.len(), 2);
        for task in &response.new_tasks {
            assert!(task.use_cross_trainer_cache());
            match task {
                TaskDef::Iteration(task) => {
                    assert_eq!(task.job_id, job_id);
                    assert_eq!(task.worker_address, worker);
                }
                TaskDef::Snapshot(_) => panic!("no snapshots were started"),
            }
        }
    }

    let workers = client.get_workers().await.unwrap();
    assert_eq!(workers.len(), 2);
}

#[tokio::test]
async fn test_snapshot_progress_survives_restart() {
    let dir = TempDir::new().unwrap();
    let work_dir = dir.path().join("work");
    let directory = dir.path().join("snap");

    {
        let work_dir = work_dir.clone();
        let client = client_with(&dir, move |c| c.dispatcher.work_dir = Some(work_dir)).await;
        client
            .snapshot(
                DatasetGraph::range(3).unwrap(),
                &directory,
                DistributedSnapshotMetadata::default(),
            )
            .await
            .unwrap();
        client
            .worker_heartbeat(WorkerHeartbeatRequest::new("worker-0"))
            .await
            .unwrap();
        let split = client.get_snapshot_split(&directory, 0, 0).await.unwrap();
        assert_eq!(split.split.unwrap().as_ref(), 0i64.to_le_bytes());
    }

    let work_dir_again = work_dir.clone();
    let client = client_with(&dir, move |c| c.dispatcher.work_dir = Some(work_dir_again)).await;
    assert_eq!(client.dispatcher().recover().await.unwrap(), 1);

    let streams = client.get_snapshot_streams(&directory).await.unwrap();
    assert_eq!(streams.len(), 1);
    assert!(streams[0].owner.is_none());

    // Recovered streams go back to workers that report progress for them
    let response = client
        .worker_heartbeat(WorkerHeartbeatRequest::new("worker-1"))
        .await
        .unwrap();
    assert!(response.snapshots.is_empty());

    let response = client
        .worker_heartbeat(WorkerHeartbeatRequest {
            worker_address: "worker-0".to_string(),
            snapshot_task_progress: vec![SnapshotTaskProgress {
                directory: directory.clone(),
                stream_index: 0,
                completed: false,
            }],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(response.snapshots.len(), 1);
    assert_eq!(response.snapshots[0].stream_index, 0);

    let split = client.get_snapshot_split(&directory, 0, 0).await.unwrap();
    assert_eq!(split.local_split_index, 1);
    assert_eq!(split.split.unwrap().as_ref(), 1i64.to_le_bytes());
}

#[tokio::test]
async fn test_unknown_snapshot_streams() {
    let dir = TempDir::new().unwrap();
    let client = client(&dir).await;

    let err = client
        .get_snapshot_streams(Path::new("/nowhere"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}
