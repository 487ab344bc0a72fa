// rust/dispatcher-core/src/client.rs

//! Dispatcher clients.
//!
//! [`LocalDispatcherClient`] calls a [`Dispatcher`] in the same process.
//! With the `grpc` feature, [`GrpcDispatcherClient`] talks to a remote
//! dispatcher service.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::dataset::{DataServiceMetadata, DatasetGraph};
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::job::SplitResult;
use crate::protocol::{
    DataServiceConfig, GetOrCreateJobRequest, SnapshotSplit, SnapshotStreamInfo,
    WorkerHeartbeatRequest, WorkerHeartbeatResponse, WorkerInfo,
};
use crate::snapshot::DistributedSnapshotMetadata;

/// Trait for dispatcher client implementations.
#[async_trait]
pub trait DispatcherClient: Send + Sync {
    /// Register a dataset, returning its id.
    ///
    /// With `dataset_id` unset the dispatcher derives an id from the
    /// dataset's content.
    async fn register_dataset(
        &self,
        graph: DatasetGraph,
        metadata: DataServiceMetadata,
        dataset_id: Option<String>,
    ) -> Result<String>;

    async fn get_data_service_metadata(&self, dataset_id: &str) -> Result<DataServiceMetadata>;

    async fn get_data_service_config(&self) -> Result<DataServiceConfig>;

    /// Start a distributed snapshot of `graph` at `directory`.
    async fn snapshot(
        &self,
        graph: DatasetGraph,
        directory: &Path,
        metadata: DistributedSnapshotMetadata,
    ) -> Result<()>;

    async fn get_or_create_job(&self, request: GetOrCreateJobRequest) -> Result<u64>;

    async fn get_or_create_iteration(&self, job_id: u64, repetition: u64) -> Result<u64>;

    async fn worker_heartbeat(
        &self,
        request: WorkerHeartbeatRequest,
    ) -> Result<WorkerHeartbeatResponse>;

    async fn get_snapshot_split(
        &self,
        directory: &Path,
        stream_index: usize,
        source_index: usize,
    ) -> Result<SnapshotSplit>;

    async fn get_split(
        &self,
        iteration_id: u64,
        repetition: u64,
        split_provider_index: usize,
    ) -> Result<SplitResult>;

    async fn get_workers(&self) -> Result<Vec<WorkerInfo>>;

    async fn get_snapshot_streams(&self, directory: &Path) -> Result<Vec<SnapshotStreamInfo>>;
}

/// Client for a dispatcher running in the same process.
#[derive(Clone)]
pub struct LocalDispatcherClient {
    dispatcher: Arc<Dispatcher>,
}

impl LocalDispatcherClient {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}

#[async_trait]
impl DispatcherClient for LocalDispatcherClient {
    async fn register_dataset(
        &self,
        graph: DatasetGraph,
        metadata: DataServiceMetadata,
        dataset_id: Option<String>,
    ) -> Result<String> {
        self.dispatcher
            .register_dataset(graph, metadata, dataset_id)
            .await
    }

    async fn get_data_service_metadata(&self, dataset_id: &str) -> Result<DataServiceMetadata> {
        self.dispatcher.get_data_service_metadata(dataset_id).await
    }

    async fn get_data_service_config(&self) -> Result<DataServiceConfig> {
        Ok(self.dispatcher.get_data_service_config())
    }

    async fn snapshot(
        &self,
        graph: DatasetGraph,
        directory: &Path,
        metadata: DistributedSnapshotMetadata,
    ) -> Result<()> {
        self.dispatcher.snapshot(graph, directory, metadata).await
    }

    async fn get_or_create_job(&self, request: GetOrCreateJobRequest) -> Result<u64> {
        self.dispatcher.get_or_create_job(&request).await
    }

    async fn get_or_create_iteration(&self, job_id: u64, repetition: u64) -> Result<u64> {
        self.dispatcher
            .get_or_create_iteration(job_id, repetition)
            .await
    }

    async fn worker_heartbeat(
        &self,
        request: WorkerHeartbeatRequest,
    ) -> Result<WorkerHeartbeatResponse> {
        self.dispatcher.worker_heartbeat(&request).await
    }

    async fn get_snapshot_split(
        &self,
        directory: &Path,
        stream_index: usize,
        source_index: usize,
    ) -> Result<SnapshotSplit> {
        self.dispatcher
            .get_snapshot_split(directory, stream_index, source_index)
            .await
    }

    async fn get_split(
        &self,
        iteration_id: u64,
        repetition: u64,
        split_provider_index: usize,
    ) -> Result<SplitResult> {
        self.dispatcher
            .get_split(iteration_id, repetition, split_provider_index)
            .await
    }

    async fn get_workers(&self) -> Result<Vec<WorkerInfo>> {
        Ok(self.dispatcher.get_workers().await)
    }

    async fn get_snapshot_streams(&self, directory: &Path) -> Result<Vec<SnapshotStreamInfo>> {
        self.dispatcher.get_snapshot_streams(directory).await
    }
}

#[cfg(feature = "grpc")]
pub use grpc::GrpcDispatcherClient;

#[cfg(feature = "grpc")]
mod grpc {
    use std::path::Path;
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use tonic::transport::{Channel, Endpoint};
    use tonic::{Code, Request, Status};

    use super::DispatcherClient;
    use crate::config::ClientConfig;
    use crate::dataset::{DataServiceMetadata, DatasetGraph};
    use crate::error::{DispatcherError, Result};
    use crate::job::SplitResult;
    use crate::proto;
    use crate::proto::dispatcher_service_client::DispatcherServiceClient;
    use crate::protocol::{
        DataServiceConfig, GetOrCreateJobRequest, SnapshotSplit, SnapshotStreamInfo,
        WorkerHeartbeatRequest, WorkerHeartbeatResponse, WorkerInfo,
    };
    use crate::snapshot::DistributedSnapshotMetadata;

    /// gRPC-based dispatcher client.
    pub struct GrpcDispatcherClient {
        config: ClientConfig,
        client: Option<DispatcherServiceClient<Channel>>,
    }

    impl GrpcDispatcherClient {
        pub fn new(config: ClientConfig) -> Self {
            Self {
                config,
                client: None,
            }
        }

        /// Connect to the dispatcher service.
        pub async fn connect(&mut self) -> Result<()> {
            let endpoint = Endpoint::from_shared(format!("http://{}", self.config.address))
                .map_err(|e| DispatcherError::config_with_source("invalid dispatcher address", e))?
                .connect_timeout(Duration::from_millis(self.config.connect_timeout_ms))
                .timeout(Duration::from_millis(self.config.request_timeout_ms));

            let channel = endpoint.connect().await.map_err(|e| {
                DispatcherError::internal_with_source(
                    format!("failed to connect to dispatcher at {}", self.config.address),
                    e,
                )
            })?;

            self.client = Some(DispatcherServiceClient::new(channel));
            Ok(())
        }

        /// Connect with retry logic.
        pub async fn connect_with_retry(&mut self) -> Result<()> {
            let mut attempts = 0;
            let mut delay = Duration::from_millis(self.config.reconnect_delay_ms);

            loop {
                match self.connect().await {
                    Ok(()) => return Ok(()),
                    Err(e) => {
                        attempts += 1;
                        if attempts >= self.config.max_reconnect_attempts {
                            return Err(DispatcherError::internal(format!(
                                "failed to connect after {} attempts: {}",
                                attempts, e
                            )));
                        }

                        tracing::debug!(attempts, error = %e, "Retrying dispatcher connection");
                        tokio::time::sleep(delay).await;
                        delay = std::cmp::min(
                            delay * 2,
                            Duration::from_millis(self.config.request_timeout_ms),
                        );
                    }
                }
            }
        }

        pub fn is_connected(&self) -> bool {
            self.client.is_some()
        }

        fn get_client(&self) -> Result<DispatcherServiceClient<Channel>> {
            self.client
                .clone()
                .ok_or_else(|| DispatcherError::internal("not connected to dispatcher"))
        }
    }

    /// Maps a status back onto the error the dispatcher raised.
    fn status_to_error(status: Status) -> DispatcherError {
        match status.code() {
            Code::NotFound => DispatcherError::not_found(status.message()),
            Code::InvalidArgument | Code::AlreadyExists => {
                DispatcherError::invalid_argument(status.message())
            }
            _ => DispatcherError::internal_with_source("dispatcher request failed", status),
        }
    }

    fn directory_string(directory: &Path) -> String {
        directory.to_string_lossy().into_owned()
    }

    #[async_trait]
    impl DispatcherClient for GrpcDispatcherClient {
        async fn register_dataset(
            &self,
            graph: DatasetGraph,
            metadata: DataServiceMetadata,
            dataset_id: Option<String>,
        ) -> Result<String> {
            let mut client = self.get_client()?;

            let request = Request::new(proto::RegisterDatasetRequest {
                dataset_graph: graph.as_bytes().to_vec(),
                metadata: Some(metadata.into()),
                dataset_id: dataset_id.unwrap_or_default(),
            });

            let response = client
                .register_dataset(request)
                .await
                .map_err(status_to_error)?;
            Ok(response.into_inner().dataset_id)
        }

        async fn get_data_service_metadata(
            &self,
            dataset_id: &str,
        ) -> Result<DataServiceMetadata> {
            let mut client = self.get_client()?;

            let request = Request::new(proto::GetDataServiceMetadataRequest {
                dataset_id: dataset_id.to_string(),
            });

            let response = client
                .get_data_service_metadata(request)
                .await
                .map_err(status_to_error)?;
            let metadata = response
                .into_inner()
                .metadata
                .ok_or_else(|| DispatcherError::serialization("missing metadata in response"))?;
            Ok(metadata.into())
        }

        async fn get_data_service_config(&self) -> Result<DataServiceConfig> {
            let mut client = self.get_client()?;

            let response = client
                .get_data_service_config(Request::new(proto::GetDataServiceConfigRequest {}))
                .await
                .map_err(status_to_error)?;
            Ok(DataServiceConfig {
                deployment_mode: response.into_inner().deployment_mode().into(),
            })
        }

        async fn snapshot(
            &self,
            graph: DatasetGraph,
            directory: &Path,
            metadata: DistributedSnapshotMetadata,
        ) -> Result<()> {
            let mut client = self.get_client()?;

            let request = Request::new(proto::SnapshotRequest {
                dataset_graph: graph.as_bytes().to_vec(),
                directory: directory_string(directory),
                metadata: Some(metadata.into()),
            });

            client.snapshot(request).await.map_err(status_to_error)?;
            Ok(())
        }

        async fn get_or_create_job(&self, request: GetOrCreateJobRequest) -> Result<u64> {
            let mut client = self.get_client()?;

            let response = client
                .get_or_create_job(Request::new(request.into()))
                .await
                .map_err(status_to_error)?;
            Ok(response.into_inner().job_id)
        }

        async fn get_or_create_iteration(&self, job_id: u64, repetition: u64) -> Result<u64> {
            let mut client = self.get_client()?;

            let request = Request::new(proto::GetOrCreateIterationRequest { job_id, repetition });

            let response = client
                .get_or_create_iteration(request)
                .await
                .map_err(status_to_error)?;
            Ok(response.into_inner().iteration_id)
        }

        async fn worker_heartbeat(
            &self,
            request: WorkerHeartbeatRequest,
        ) -> Result<WorkerHeartbeatResponse> {
            let mut client = self.get_client()?;

            let response = client
                .worker_heartbeat(Request::new(request.into()))
                .await
                .map_err(status_to_error)?;
            response.into_inner().try_into()
        }

        async fn get_snapshot_split(
            &self,
            directory: &Path,
            stream_index: usize,
            source_index: usize,
        ) -> Result<SnapshotSplit> {
            let mut client = self.get_client()?;

            let request = Request::new(proto::GetSnapshotSplitRequest {
                directory: directory_string(directory),
                stream_index: stream_index as u64,
                source_index: source_index as u64,
            });

            let response = client
                .get_snapshot_split(request)
                .await
                .map_err(status_to_error)?;
            Ok(response.into_inner().into())
        }

        async fn get_split(
            &self,
            iteration_id: u64,
            repetition: u64,
            split_provider_index: usize,
        ) -> Result<SplitResult> {
            let mut client = self.get_client()?;

            let request = Request::new(proto::GetSplitRequest {
                iteration_id,
                repetition,
                split_provider_index: split_provider_index as u64,
            });

            let response = client.get_split(request).await.map_err(status_to_error)?;
            let response = response.into_inner();
            Ok(SplitResult {
                split: response.split.map(Bytes::from),
                end_of_splits: response.end_of_splits,
            })
        }

        async fn get_workers(&self) -> Result<Vec<WorkerInfo>> {
            let mut client = self.get_client()?;

            let response = client
                .get_workers(Request::new(proto::GetWorkersRequest {}))
                .await
                .map_err(status_to_error)?;
            Ok(response
                .into_inner()
                .workers
                .into_iter()
                .map(Into::into)
                .collect())
        }

        async fn get_snapshot_streams(
            &self,
            directory: &Path,
        ) -> Result<Vec<SnapshotStreamInfo>> {
            let mut client = self.get_client()?;

            let request = Request::new(proto::GetSnapshotStreamsRequest {
                directory: directory_string(directory),
            });

            let response = client
                .get_snapshot_streams(request)
                .await
                .map_err(status_to_error)?;
            Ok(response
                .into_inner()
                .streams
                .into_iter()
                .map(Into::into)
                .collect())
        }
    }

}
