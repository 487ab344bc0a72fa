//! gRPC service implementation for the dispatcher.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tonic::{Request, Response, Status};

use dispatcher_core::proto::dispatcher_service_server::DispatcherService;
use dispatcher_core::proto::{
    self, GetDataServiceConfigRequest, GetDataServiceConfigResponse,
    GetDataServiceMetadataRequest, GetDataServiceMetadataResponse, GetOrCreateIterationRequest,
    GetOrCreateIterationResponse, GetOrCreateJobRequest, GetOrCreateJobResponse,
    GetSnapshotSplitRequest, GetSnapshotSplitResponse, GetSnapshotStreamsRequest,
    GetSnapshotStreamsResponse, GetSplitRequest, GetSplitResponse, GetWorkersRequest,
    GetWorkersResponse, RegisterDatasetRequest, RegisterDatasetResponse, SnapshotRequest,
    SnapshotResponse, WorkerHeartbeatRequest, WorkerHeartbeatResponse,
};
use dispatcher_core::protocol;
use dispatcher_core::{DatasetGraph, Dispatcher, DispatcherError};

pub struct DispatcherServiceImpl {
    dispatcher: Arc<Dispatcher>,
}

impl DispatcherServiceImpl {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

fn error_to_status(error: DispatcherError) -> Status {
    match error {
        DispatcherError::NotFound { message } => Status::not_found(message),
        DispatcherError::InvalidArgument { message } => Status::invalid_argument(message),
        other => {
            tracing::error!(error = %other, "Request failed");
            Status::internal(other.to_string())
        }
    }
}

fn to_index(value: u64, field: &str) -> Result<usize, Status> {
    usize::try_from(value).map_err(|_| Status::invalid_argument(format!("{field} out of range")))
}

#[tonic::async_trait]
impl DispatcherService for DispatcherServiceImpl {
    async fn register_dataset(
        &self,
        request: Request<RegisterDatasetRequest>,
    ) -> Result<Response<RegisterDatasetResponse>, Status> {
        let req = request.into_inner();

        let graph = DatasetGraph::from(Bytes::from(req.dataset_graph));
        let metadata = req.metadata.map(Into::into).unwrap_or_default();
        let dataset_id = Some(req.dataset_id).filter(|id| !id.is_empty());

        let dataset_id = self
            .dispatcher
            .register_dataset(graph, metadata, dataset_id)
            .await
            .map_err(error_to_status)?;

        Ok(Response::new(RegisterDatasetResponse { dataset_id }))
    }

    async fn get_data_service_metadata(
        &self,
        request: Request<GetDataServiceMetadataRequest>,
    ) -> Result<Response<GetDataServiceMetadataResponse>, Status> {
        let req = request.into_inner();

        let metadata = self
            .dispatcher
            .get_data_service_metadata(&req.dataset_id)
            .await
            .map_err(error_to_status)?;

        Ok(Response::new(GetDataServiceMetadataResponse {
            metadata: Some(metadata.into()),
        }))
    }

    async fn get_data_service_config(
        &self,
        _request: Request<GetDataServiceConfigRequest>,
    ) -> Result<Response<GetDataServiceConfigResponse>, Status> {
        let config = self.dispatcher.get_data_service_config();
        Ok(Response::new(GetDataServiceConfigResponse {
            deployment_mode: proto::DeploymentMode::from(config.deployment_mode).into(),
        }))
    }

    async fn snapshot(
        &self,
        request: Request<SnapshotRequest>,
    ) -> Result<Response<SnapshotResponse>, Status> {
        let req = request.into_inner();

        let graph = DatasetGraph::from(Bytes::from(req.dataset_graph));
        let metadata = req.metadata.map(Into::into).unwrap_or_default();

        self.dispatcher
            .snapshot(graph, &PathBuf::from(req.directory), metadata)
            .await
            .map_err(error_to_status)?;

        Ok(Response::new(SnapshotResponse {}))
    }

    async fn get_or_create_job(
        &self,
        request: Request<GetOrCreateJobRequest>,
    ) -> Result<Response<GetOrCreateJobResponse>, Status> {
        let req: protocol::GetOrCreateJobRequest = request.into_inner().into();

        let job_id = self
            .dispatcher
            .get_or_create_job(&req)
            .await
            .map_err(error_to_status)?;

        Ok(Response::new(GetOrCreateJobResponse { job_id }))
    }

    async fn get_or_create_iteration(
        &self,
        request: Request<GetOrCreateIterationRequest>,
    ) -> Result<Response<GetOrCreateIterationResponse>, Status> {
        let req = request.into_inner();

        let iteration_id = self
            .dispatcher
            .get_or_create_iteration(req.job_id, req.repetition)
            .await
            .map_err(error_to_status)?;

        Ok(Response::new(GetOrCreateIterationResponse { iteration_id }))
    }

    async fn worker_heartbeat(
        &self,
        request: Request<WorkerHeartbeatRequest>,
    ) -> Result<Response<WorkerHeartbeatResponse>, Status> {
        let req: protocol::WorkerHeartbeatRequest = request.into_inner().into();

        let response = self
            .dispatcher
            .worker_heartbeat(&req)
            .await
            .map_err(error_to_status)?;

        Ok(Response::new(response.into()))
    }

    async fn get_snapshot_split(
        &self,
        request: Request<GetSnapshotSplitRequest>,
    ) -> Result<Response<GetSnapshotSplitResponse>, Status> {
        let req = request.into_inner();
        let stream_index = to_index(req.stream_index, "stream_index")?;
        let source_index = to_index(req.source_index, "source_index")?;

        let split = self
            .dispatcher
            .get_snapshot_split(&PathBuf::from(req.directory), stream_index, source_index)
            .await
            .map_err(error_to_status)?;

        Ok(Response::new(split.into()))
    }

    async fn get_split(
        &self,
        request: Request<GetSplitRequest>,
    ) -> Result<Response<GetSplitResponse>, Status> {
        let req = request.into_inner();
        let provider_index = to_index(req.split_provider_index, "split_provider_index")?;

        let result = self
            .dispatcher
            .get_split(req.iteration_id, req.repetition, provider_index)
            .await
            .map_err(error_to_status)?;

        Ok(Response::new(GetSplitResponse {
            split: result.split.map(|split| split.to_vec()),
            end_of_splits: result.end_of_splits,
        }))
    }

    async fn get_workers(
        &self,
        _request: Request<GetWorkersRequest>,
    ) -> Result<Response<GetWorkersResponse>, Status> {
        let workers = self.dispatcher.get_workers().await;
        Ok(Response::new(GetWorkersResponse {
            workers: workers.into_iter().map(Into::into).collect(),
        }))
    }

    async fn get_snapshot_streams(
        &self,
        request: Request<GetSnapshotStreamsRequest>,
    ) -> Result<Response<GetSnapshotStreamsResponse>, Status> {
        let req = request.into_inner();

        let streams = self
            .dispatcher
            .get_snapshot_streams(&PathBuf::from(req.directory))
            .await
            .map_err(error_to_status)?;

        Ok(Response::new(GetSnapshotStreamsResponse {
            streams: streams.into_iter().map(Into::into).collect(),
        }))
    }
}
