// rust/dispatcher-core/src/job/registry.rs

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use super::types::{Iteration, Job, SplitResult};
use crate::dataset::SplitProvider;
use crate::error::{DispatcherError, Result};
use crate::protocol::GetOrCreateJobRequest;

/// Dispatcher-side split provider of a dynamically sharded iteration.
struct ProviderSlot {
    provider: Box<dyn SplitProvider>,
    repetition: u64,
}

/// Split state of one iteration, locked independently of the registry.
struct IterationSplits {
    slots: Vec<ProviderSlot>,
}

#[derive(Default)]
struct JobState {
    jobs: HashMap<u64, Job>,
    jobs_by_name: HashMap<String, u64>,
    next_job_id: u64,
    iterations: HashMap<u64, Iteration>,
    iterations_by_key: HashMap<(u64, u64), u64>,
    next_iteration_id: u64,
    splits: HashMap<u64, Arc<Mutex<IterationSplits>>>,
}

/// Jobs and their iterations.
///
/// All mutations go through a single write lock, so two concurrent requests
/// for the same job name or the same `(job, repetition)` pair never create
/// two records.
#[derive(Default)]
pub struct JobRegistry {
    state: RwLock<JobState>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the named job matching `request`, or creates a new job.
    ///
    /// The caller is responsible for checking that the dataset exists.
    pub async fn get_or_create_job(&self, request: &GetOrCreateJobRequest) -> Result<u64> {
        let mut state = self.state.write().await;

        if let Some(name) = &request.job_name {
            if let Some(job) = state.jobs_by_name.get(name).and_then(|id| state.jobs.get(id)) {
                validate_matching_job(job, request)?;
                return Ok(job.job_id);
            }
        }

        let job_id = state.next_job_id;
        state.next_job_id += 1;

        let job = Job {
            job_id,
            dataset_id: request.dataset_id.clone(),
            job_name: request.job_name.clone(),
            processing_mode: request.processing_mode,
            num_consumers: request.num_consumers,
            use_cross_trainer_cache: request.use_cross_trainer_cache,
            target_workers: request.target_workers,
            created_at: Utc::now(),
        };

        tracing::info!(
            job_id,
            dataset_id = %job.dataset_id,
            job_name = job.job_name.as_deref().unwrap_or(""),
            processing_mode = %job.processing_mode,
            use_cross_trainer_cache = job.use_cross_trainer_cache,
            "Job created"
        );

        if let Some(name) = &job.job_name {
            state.jobs_by_name.insert(name.clone(), job_id);
        }
        state.jobs.insert(job_id, job);

        Ok(job_id)
    }

    /// Returns the iteration for `(job_id, repetition)`, creating it on first use.
    ///
    /// `make_providers` is only called when a dynamically sharded job gets a
    /// new iteration.
    pub async fn get_or_create_iteration<F>(
        &self,
        job_id: u64,
        repetition: u64,
        make_providers: F,
    ) -> Result<u64>
    where
        F: FnOnce() -> Result<Vec<Box<dyn SplitProvider>>>,
    {
        let mut state = self.state.write().await;

        let job = state.jobs.get(&job_id).ok_or_else(|| job_not_found(job_id))?;
        if let Some(&iteration_id) = state.iterations_by_key.get(&(job_id, repetition)) {
            return Ok(iteration_id);
        }
        let dynamic = job.processing_mode.is_dynamic();

        let splits = if dynamic {
            let slots = make_providers()?
                .into_iter()
                .map(|provider| ProviderSlot {
                    provider,
                    repetition,
                })
                .collect();
            Some(Arc::new(Mutex::new(IterationSplits { slots })))
        } else {
            None
        };

        let iteration_id = state.next_iteration_id;
        state.next_iteration_id += 1;

        state.iterations.insert(
            iteration_id,
            Iteration {
                iteration_id,
                job_id,
                repetition,
                created_at: Utc::now(),
            },
        );
        state.iterations_by_key.insert((job_id, repetition), iteration_id);
        if let Some(splits) = splits {
            state.splits.insert(iteration_id, splits);
        }

        tracing::info!(iteration_id, job_id, repetition, dynamic, "Iteration created");

        Ok(iteration_id)
    }

    /// Pulls the next split of a dynamically sharded iteration.
    pub async fn get_split(
        &self,
        iteration_id: u64,
        repetition: u64,
        provider_index: usize,
    ) -> Result<SplitResult> {
        let splits = {
            let state = self.state.read().await;
            if !state.iterations.contains_key(&iteration_id) {
                return Err(DispatcherError::not_found(format!(
                    "Iteration id {iteration_id} not found"
                )));
            }
            state.splits.get(&iteration_id).cloned().ok_or_else(|| {
                DispatcherError::invalid_argument(format!(
                    "Iteration {iteration_id} does not use dynamic sharding"
                ))
            })?
        };

        let mut splits = splits.lock().await;
        let num_providers = splits.slots.len();
        let slot = splits.slots.get_mut(provider_index).ok_or_else(|| {
            DispatcherError::invalid_argument(format!(
                "Split provider index {provider_index} out of range; iteration {iteration_id} has {num_providers} split providers"
            ))
        })?;

        if repetition < slot.repetition {
            return Ok(SplitResult::end_of_splits());
        }
        if repetition > slot.repetition {
            slot.provider.reset()?;
            slot.repetition = repetition;
        }

        Ok(match slot.provider.next()? {
            Some(split) => SplitResult {
                split: Some(split),
                end_of_splits: false,
            },
            None => SplitResult::end_of_splits(),
        })
    }

    pub async fn job(&self, job_id: u64) -> Result<Job> {
        let state = self.state.read().await;
        state.jobs.get(&job_id).cloned().ok_or_else(|| job_not_found(job_id))
    }

    /// Every iteration paired with its job, ordered by iteration id.
    pub async fn iterations(&self) -> Vec<(Iteration, Job)> {
        let state = self.state.read().await;
        let mut iterations: Vec<_> = state
            .iterations
            .values()
            .filter_map(|it| state.jobs.get(&it.job_id).map(|job| (it.clone(), job.clone())))
            .collect();
        iterations.sort_by_key(|(it, _)| it.iteration_id);
        iterations
    }

    #[cfg(test)]
    pub async fn job_count(&self) -> usize {
        self.state.read().await.jobs.len()
    }
}

fn job_not_found(job_id: u64) -> DispatcherError {
    DispatcherError::not_found(format!("Job id {job_id} not found"))
}

fn validate_matching_job(job: &Job, request: &GetOrCreateJobRequest) -> Result<()> {
    let mode_differs = job.processing_mode != request.processing_mode;
    let cache_differs = job.use_cross_trainer_cache != request.use_cross_trainer_cache;
    let consumers_differ = job.num_consumers != request.num_consumers;
    if !(mode_differs || cache_differs || consumers_differ) {
        return Ok(());
    }

    let mut diffs = Vec::new();
    if mode_differs {
        diffs.push(format!(
            "Existing processing mode: <{}>; got <{}>",
            job.processing_mode, request.processing_mode
        ));
    }
    // Cache state is reported on every mismatch.
    diffs.push(format!(
        "Existing cross-trainer cache: <{}>; got <{}>",
        enabled_str(job.use_cross_trainer_cache),
        enabled_str(request.use_cross_trainer_cache)
    ));
    if consumers_differ {
        diffs.push(format!(
            "Existing number of consumers: <{}>; got <{}>",
            consumers_str(job.num_consumers),
            consumers_str(request.num_consumers)
        ));
    }

    Err(DispatcherError::invalid_argument(format!(
        "Tried to create job with name {}, but found an existing job with different parameters: {}",
        job.job_name.as_deref().unwrap_or_default(),
        diffs.join("; ")
    )))
}

fn enabled_str(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}

fn consumers_str(num_consumers: Option<u64>) -> String {
    num_consumers.map_or_else(|| "unset".to_string(), |n| n.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{DatasetGraph, GraphSplitProviderFactory, SplitProviderFactory};
    use crate::job::types::{ProcessingMode, TargetWorkers};

    fn request(name: Option<&str>, mode: ProcessingMode, cache: bool) -> GetOrCreateJobRequest {
        GetOrCreateJobRequest {
            dataset_id: "ds".to_string(),
            processing_mode: mode,
            job_name: name.map(str::to_string),
            num_consumers: None,
            use_cross_trainer_cache: cache,
            target_workers: TargetWorkers::Auto,
        }
    }

    fn providers(n: i64) -> impl FnOnce() -> Result<Vec<Box<dyn SplitProvider>>> {
        move || GraphSplitProviderFactory.split_providers(&DatasetGraph::range(n)?)
    }

    fn no_providers() -> Result<Vec<Box<dyn SplitProvider>>> {
        panic!("split providers requested for a non-dynamic job")
    }

    #[tokio::test]
    async fn test_named_job_reused() {
        let registry = JobRegistry::new();
        let req = request(Some("job"), ProcessingMode::off(), true);

        let first = registry.get_or_create_job(&req).await.unwrap();
        let second = registry.get_or_create_job(&req).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(registry.job_count().await, 1);
    }

    #[tokio::test]
    async fn test_unnamed_jobs_are_fresh() {
        let registry = JobRegistry::new();
        let req = request(None, ProcessingMode::off(), false);

        let first = registry.get_or_create_job(&req).await.unwrap();
        let second = registry.get_or_create_job(&req).await.unwrap();

        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_named_job_mismatch_message() {
        let registry = JobRegistry::new();
        registry
            .get_or_create_job(&request(Some("job"), ProcessingMode::off(), false))
            .await
            .unwrap();

        let err = registry
            .get_or_create_job(&request(Some("job"), ProcessingMode::dynamic(), false))
            .await
            .unwrap_err();

        assert!(err.is_invalid_argument());
        let message = err.to_string();
        assert!(message.contains(
            "Tried to create job with name job, but found an existing job with different parameters: "
        ));
        assert!(message.contains("Existing processing mode: <>"));
        assert!(message.contains("got <sharding_policy: DYNAMIC>"));
        assert!(message.contains("Existing cross-trainer cache: <disabled>; got <disabled>"));
    }

    #[tokio::test]
    async fn test_mode_mismatch_reports_enabled_cache() {
        let registry = JobRegistry::new();
        registry
            .get_or_create_job(&request(Some("job"), ProcessingMode::off(), true))
            .await
            .unwrap();

        let message = registry
            .get_or_create_job(&request(Some("job"), ProcessingMode::dynamic(), true))
            .await
            .unwrap_err()
            .to_string();

        assert!(message.contains(
            "Existing processing mode: <>; got <sharding_policy: DYNAMIC>; \
             Existing cross-trainer cache: <enabled>; got <enabled>"
        ));
        assert!(!message.contains("number of consumers"));
    }

    #[tokio::test]
    async fn test_named_job_mismatch_lists_every_difference() {
        let registry = JobRegistry::new();
        registry
            .get_or_create_job(&request(Some("job"), ProcessingMode::off(), false))
            .await
            .unwrap();

        let mut req = request(Some("job"), ProcessingMode::dynamic(), true);
        req.num_consumers = Some(2);
        let message = registry.get_or_create_job(&req).await.unwrap_err().to_string();

        assert!(message.contains("Existing processing mode: <>"));
        assert!(message.contains("Existing cross-trainer cache: <disabled>; got <enabled>"));
        assert!(message.contains("Existing number of consumers: <unset>; got <2>"));
    }

    #[tokio::test]
    async fn test_concurrent_named_job_creates_once() {
        let registry = Arc::new(JobRegistry::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry
                    .get_or_create_job(&request(Some("shared"), ProcessingMode::off(), false))
                    .await
                    .unwrap()
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(registry.job_count().await, 1);
    }

    #[tokio::test]
    async fn test_iteration_memoized_per_repetition() {
        let registry = JobRegistry::new();
        let job_id = registry
            .get_or_create_job(&request(None, ProcessingMode::off(), false))
            .await
            .unwrap();

        let first = registry.get_or_create_iteration(job_id, 0, no_providers).await.unwrap();
        let again = registry.get_or_create_iteration(job_id, 0, no_providers).await.unwrap();
        let next = registry.get_or_create_iteration(job_id, 1, no_providers).await.unwrap();

        assert_eq!(first, again);
        assert_ne!(first, next);
        assert_eq!(registry.iterations().await.len(), 2);
    }

    #[tokio::test]
    async fn test_iteration_unknown_job() {
        let registry = JobRegistry::new();
        let err = registry
            .get_or_create_iteration(7, 0, no_providers)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Job id 7 not found");
    }

    #[tokio::test]
    async fn test_get_split_dynamic() {
        let registry = JobRegistry::new();
        let job_id = registry
            .get_or_create_job(&request(None, ProcessingMode::dynamic(), false))
            .await
            .unwrap();
        let iteration_id = registry
            .get_or_create_iteration(job_id, 0, providers(2))
            .await
            .unwrap();

        let first = registry.get_split(iteration_id, 0, 0).await.unwrap();
        let second = registry.get_split(iteration_id, 0, 0).await.unwrap();
        let third = registry.get_split(iteration_id, 0, 0).await.unwrap();

        assert!(!first.end_of_splits);
        assert_ne!(first.split, second.split);
        assert!(third.end_of_splits);
        assert!(third.split.is_none());

        // A new repetition rewinds the provider
        let rewound = registry.get_split(iteration_id, 1, 0).await.unwrap();
        assert_eq!(rewound.split, first.split);

        // Stale repetitions see the end
        let stale = registry.get_split(iteration_id, 0, 0).await.unwrap();
        assert!(stale.end_of_splits);
    }

    #[tokio::test]
    async fn test_get_split_errors() {
        let registry = JobRegistry::new();
        assert!(registry.get_split(3, 0, 0).await.unwrap_err().is_not_found());

        let static_job = registry
            .get_or_create_job(&request(None, ProcessingMode::off(), false))
            .await
            .unwrap();
        let iteration_id = registry
            .get_or_create_iteration(static_job, 0, no_providers)
            .await
            .unwrap();
        assert!(registry
            .get_split(iteration_id, 0, 0)
            .await
            .unwrap_err()
            .is_invalid_argument());

        let dynamic_job = registry
            .get_or_create_job(&request(None, ProcessingMode::dynamic(), false))
            .await
            .unwrap();
        let iteration_id = registry
            .get_or_create_iteration(dynamic_job, 0, providers(1))
            .await
            .unwrap();
        assert!(registry
            .get_split(iteration_id, 0, 5)
            .await
            .unwrap_err()
            .is_invalid_argument());
    }
}
