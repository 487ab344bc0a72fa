// rust/dispatcher-core/src/lib.rs

//! Data Service Dispatcher - Core Library
//!
//! This crate holds the dispatcher's coordination logic: dataset, job and
//! iteration registries, distributed snapshot bookkeeping, the worker
//! heartbeat protocol, and the on-disk layout that makes snapshot progress
//! recoverable after a restart.

pub mod config;
pub mod error;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::{DeploymentMode, DispatcherConfig};
pub use error::{DispatcherError, Result};
pub use storage::{AsyncLocalStorage, AsyncStorageBackend, ObjectMeta};

pub mod dataset;
pub use dataset::{
    Cardinality, Compression, DataServiceMetadata, DatasetGraph, DatasetRegistry,
    GraphSplitProviderFactory, SourceDef, SplitProvider, SplitProviderFactory,
};

pub mod job;
pub use job::{Iteration, Job, JobRegistry, ProcessingMode, ShardingPolicy, TargetWorkers};

pub mod snapshot;
pub use snapshot::{DistributedSnapshotMetadata, SnapshotManager, SnapshotMetadata};

pub mod dispatcher;
pub use dispatcher::Dispatcher;

pub mod protocol;

mod client;
pub use client::{DispatcherClient, LocalDispatcherClient};
#[cfg(feature = "grpc")]
pub use client::GrpcDispatcherClient;

/// Generated protobuf types and service stubs.
#[cfg(feature = "grpc")]
pub mod proto {
    tonic::include_proto!("dsd.dispatcher");
}
