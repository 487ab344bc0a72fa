// rust/dispatcher-core/src/dispatcher/tasks.rs

use std::collections::{BTreeMap, HashMap};

use tokio::sync::RwLock;

use crate::job::{Iteration, Job};
use crate::protocol::IterationTaskDef;

#[derive(Default)]
struct TaskState {
    tasks: BTreeMap<u64, IterationTaskDef>,
    by_key: HashMap<(u64, String), u64>,
    next_task_id: u64,
}

/// Iteration tasks, at most one per `(iteration, worker)`.
#[derive(Default)]
pub struct TaskRegistry {
    state: RwLock<TaskState>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every task of `worker_address`, creating one for each
    /// iteration the worker does not have a task for yet.
    pub async fn tasks_for_worker(
        &self,
        worker_address: &str,
        iterations: &[(Iteration, Job)],
    ) -> Vec<IterationTaskDef> {
        let mut state = self.state.write().await;
        let mut tasks = Vec::with_capacity(iterations.len());

        for (iteration, job) in iterations {
            let key = (iteration.iteration_id, worker_address.to_string());
            if let Some(task) = state.by_key.get(&key).and_then(|id| state.tasks.get(id)) {
                tasks.push(task.clone());
                continue;
            }

            let task_id = state.next_task_id;
            state.next_task_id += 1;

            let task = IterationTaskDef {
                task_id,
                iteration_id: iteration.iteration_id,
                job_id: job.job_id,
                dataset_id: job.dataset_id.clone(),
                repetition: iteration.repetition,
                processing_mode: job.processing_mode,
                num_consumers: job.num_consumers,
                use_cross_trainer_cache: job.use_cross_trainer_cache,
                worker_address: worker_address.to_string(),
            };

            tracing::info!(
                task_id,
                iteration_id = iteration.iteration_id,
                worker = %worker_address,
                "Task created"
            );

            state.by_key.insert(key, task_id);
            state.tasks.insert(task_id, task.clone());
            tasks.push(task);
        }

        tasks
    }

    #[cfg(test)]
    pub async fn task(&self, task_id: u64) -> Option<IterationTaskDef> {
        self.state.read().await.tasks.get(&task_id).cloned()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.state.read().await.tasks.len()
    }

    #[cfg(test)]
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.tasks.is_empty()
    }
}
