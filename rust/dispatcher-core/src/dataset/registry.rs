// rust/dispatcher-core/src/dataset/registry.rs

use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::Arc;

use tokio::sync::RwLock;
use twox_hash::XxHash64;

use super::types::{DataServiceMetadata, DatasetGraph, DatasetRecord};
use crate::error::{DispatcherError, Result};

/// Registered datasets by id.
#[derive(Default)]
pub struct DatasetRegistry {
    datasets: RwLock<HashMap<String, Arc<DatasetRecord>>>,
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a dataset and returns its id.
    ///
    /// Re-registering an identical dataset is a no-op that returns the
    /// existing id. Generated ids are derived from the dataset content, so
    /// a retried registration without a requested id lands on the same id.
    pub async fn register(
        &self,
        graph: DatasetGraph,
        metadata: DataServiceMetadata,
        requested_id: Option<String>,
    ) -> Result<String> {
        if let Some(dataset_id) = requested_id {
            let mut datasets = self.datasets.write().await;
            if let Some(existing) = datasets.get(&dataset_id) {
                if existing.same_structure(&graph, &metadata) {
                    return Ok(dataset_id);
                }
                return Err(DispatcherError::invalid_argument(format!(
                    "Datasets with the same ID should have the same structure, got conflicting datasets with ID {dataset_id}"
                )));
            }
            insert(&mut datasets, dataset_id.clone(), graph, metadata);
            return Ok(dataset_id);
        }

        // Hash outside the lock
        let base = fingerprint(&graph, &metadata)?;
        let mut datasets = self.datasets.write().await;
        let mut candidate = base.clone();
        let mut suffix = 1u64;
        loop {
            match datasets.get(&candidate) {
                Some(existing) if existing.same_structure(&graph, &metadata) => return Ok(candidate),
                Some(_) => {
                    candidate = format!("{base}-{suffix}");
                    suffix += 1;
                }
                None => {
                    insert(&mut datasets, candidate.clone(), graph, metadata);
                    return Ok(candidate);
                }
            }
        }
    }

    pub async fn get(&self, dataset_id: &str) -> Result<Arc<DatasetRecord>> {
        let datasets = self.datasets.read().await;
        datasets
            .get(dataset_id)
            .cloned()
            .ok_or_else(|| DispatcherError::not_found(format!("Dataset id {dataset_id} not found")))
    }

    pub async fn metadata(&self, dataset_id: &str) -> Result<DataServiceMetadata> {
        Ok(self.get(dataset_id).await?.metadata.clone())
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.datasets.read().await.len()
    }

    #[cfg(test)]
    pub async fn is_empty(&self) -> bool {
        self.datasets.read().await.is_empty()
    }
}

fn insert(
    datasets: &mut HashMap<String, Arc<DatasetRecord>>,
    dataset_id: String,
    graph: DatasetGraph,
    metadata: DataServiceMetadata,
) {
    tracing::info!(
        dataset_id = %dataset_id,
        graph_bytes = graph.len(),
        cardinality = %metadata.cardinality,
        "Dataset registered"
    );
    let record = DatasetRecord {
        dataset_id: dataset_id.clone(),
        graph,
        metadata,
    };
    datasets.insert(dataset_id, Arc::new(record));
}

/// Content-derived id: hex XxHash64 over the graph and encoded metadata.
fn fingerprint(graph: &DatasetGraph, metadata: &DataServiceMetadata) -> Result<String> {
    let encoded = bincode::serialize(metadata).map_err(|e| {
        DispatcherError::serialization_with_source("failed to encode dataset metadata", e)
    })?;

    let mut hasher = XxHash64::default();
    hasher.write(graph.as_bytes());
    hasher.write(&encoded);
    Ok(format!("{:016x}", hasher.finish()))
}
