// rust/dispatcher-core/src/dispatcher/workers.rs

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::protocol::WorkerInfo;

/// Worker state tracked by the dispatcher.
#[derive(Debug, Clone)]
pub struct WorkerState {
    pub worker_address: String,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: Instant,
    pub last_heartbeat_time: DateTime<Utc>,
    pub healthy: bool,
}

impl WorkerState {
    pub fn new(worker_address: String) -> Self {
        let now = Utc::now();
        Self {
            worker_address,
            registered_at: now,
            last_heartbeat: Instant::now(),
            last_heartbeat_time: now,
            healthy: true,
        }
    }

    pub fn update_heartbeat(&mut self) {
        self.last_heartbeat = Instant::now();
        self.last_heartbeat_time = Utc::now();
        self.healthy = true;
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_heartbeat.elapsed() > timeout
    }

    pub fn to_worker_info(&self) -> WorkerInfo {
        WorkerInfo {
            worker_address: self.worker_address.clone(),
            healthy: self.healthy,
            registered_at_ms: self.registered_at.timestamp_millis(),
            last_heartbeat_ms: self.last_heartbeat_time.timestamp_millis(),
        }
    }
}

/// Workers keyed by address.
pub struct WorkerRegistry {
    workers: RwLock<HashMap<String, WorkerState>>,
    worker_timeout: Duration,
}

impl WorkerRegistry {
    pub fn new(worker_timeout: Duration) -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            worker_timeout,
        }
    }

    /// Records a heartbeat, registering the worker on first contact.
    pub async fn heartbeat(&self, worker_address: &str) {
        let mut workers = self.workers.write().await;

        if let Some(existing) = workers.get_mut(worker_address) {
            if !existing.healthy {
                tracing::info!(worker = %worker_address, "Worker reconnected");
            }
            existing.update_heartbeat();
            return;
        }

        workers.insert(
            worker_address.to_string(),
            WorkerState::new(worker_address.to_string()),
        );
        tracing::info!(worker = %worker_address, "Worker registered");
    }

    /// Marks workers that missed their heartbeat deadline as unhealthy.
    ///
    /// Returns the addresses that became unhealthy during this sweep.
    pub async fn check_timeouts(&self) -> Vec<String> {
        let mut workers = self.workers.write().await;
        let mut timed_out = Vec::new();

        for worker in workers.values_mut() {
            if worker.healthy && worker.is_timed_out(self.worker_timeout) {
                worker.healthy = false;
                timed_out.push(worker.worker_address.clone());
            }
        }

        timed_out.sort();
        timed_out
    }

    pub async fn unhealthy(&self) -> HashSet<String> {
        let workers = self.workers.read().await;
        workers
            .values()
            .filter(|w| !w.healthy)
            .map(|w| w.worker_address.clone())
            .collect()
    }

    /// Known workers ordered by address.
    pub async fn list(&self) -> Vec<WorkerInfo> {
        let workers = self.workers.read().await;
        let mut infos: Vec<_> = workers.values().map(WorkerState::to_worker_info).collect();
        infos.sort_by(|a, b| a.worker_address.cmp(&b.worker_address));
        infos
    }

    #[cfg(test)]
    pub async fn worker_count(&self) -> usize {
        self.workers.read().await.len()
    }
}
