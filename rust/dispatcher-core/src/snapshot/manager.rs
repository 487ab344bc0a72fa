// rust/dispatcher-core/src/snapshot/manager.rs

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use super::metadata::{DistributedSnapshotMetadata, SnapshotMetadata};
use super::paths;
use crate::config::DispatcherSettings;
use crate::dataset::{DatasetGraph, SplitProvider, SplitProviderFactory};
use crate::error::{DispatcherError, Result};
use crate::protocol::{SnapshotSplit, SnapshotStreamInfo, SnapshotTaskDef, SnapshotTaskProgress};
use crate::storage::AsyncStorageBackend;

/// File under the work directory listing every started snapshot.
const SNAPSHOT_DIRECTORIES_FILE_NAME: &str = "snapshot_directories";

struct SourceInner {
    provider: Box<dyn SplitProvider>,
    next_global_index: u64,
}

/// One dataset source, shared by every stream of the snapshot.
struct SourceState {
    inner: Mutex<SourceInner>,
    exhausted: AtomicBool,
}

/// A split taken from its source but not yet persisted.
struct PendingSplit {
    local_index: u64,
    global_index: u64,
    payload: Bytes,
}

/// Read position of one stream in one source.
#[derive(Default)]
struct SourceCursor {
    next_local_index: u64,
    pending: Option<PendingSplit>,
    end_of_splits: bool,
}

struct StreamState {
    owner: Option<String>,
    done: bool,
    cursors: Arc<Vec<Mutex<SourceCursor>>>,
}

impl StreamState {
    fn new(num_sources: usize, owner: Option<String>) -> Self {
        Self::with_cursors(
            (0..num_sources).map(|_| SourceCursor::default()).collect(),
            owner,
            false,
        )
    }

    fn with_cursors(cursors: Vec<SourceCursor>, owner: Option<String>, done: bool) -> Self {
        Self {
            owner,
            done,
            cursors: Arc::new(cursors.into_iter().map(Mutex::new).collect()),
        }
    }

    fn is_owned_by(&self, worker: &str) -> bool {
        self.owner.as_deref() == Some(worker)
    }
}

struct SnapshotState {
    directory: PathBuf,
    sources: Vec<SourceState>,
    streams: RwLock<Vec<StreamState>>,
    // Serializes ownership changes and stream creation.
    assignment: Mutex<()>,
    completed: AtomicBool,
    /// Set when rebuilt from storage.
    recovered_at: Option<Instant>,
}

impl SnapshotState {
    fn new(
        directory: PathBuf,
        sources: Vec<SourceState>,
        streams: Vec<StreamState>,
        recovered_at: Option<Instant>,
    ) -> Self {
        Self {
            directory,
            sources,
            streams: RwLock::new(streams),
            assignment: Mutex::new(()),
            completed: AtomicBool::new(false),
            recovered_at,
        }
    }

    fn num_sources(&self) -> usize {
        self.sources.len()
    }

    fn all_sources_exhausted(&self) -> bool {
        self.sources.iter().all(|s| s.exhausted.load(Ordering::Acquire))
    }

    /// Takes the next split of a source together with its global index.
    async fn next_split(&self, source_index: usize) -> Result<Option<(u64, Bytes)>> {
        let source = &self.sources[source_index];
        if source.exhausted.load(Ordering::Acquire) {
            return Ok(None);
        }

        let mut inner = source.inner.lock().await;
        match inner.provider.next()? {
            Some(payload) => {
                let global_index = inner.next_global_index;
                inner.next_global_index += 1;
                Ok(Some((global_index, payload)))
            }
            None => {
                source.exhausted.store(true, Ordering::Release);
                Ok(None)
            }
        }
    }

    fn task_def(&self, stream_index: usize) -> SnapshotTaskDef {
        SnapshotTaskDef {
            directory: self.directory.clone(),
            stream_index,
            num_sources: self.num_sources(),
            use_cross_trainer_cache: false,
        }
    }

    /// Logs completion the first time every source and stream is finished.
    async fn refresh_completed(&self) {
        if !self.all_sources_exhausted() {
            return;
        }
        let streams = self.streams.read().await;
        if streams.iter().all(|s| s.done) && !self.completed.swap(true, Ordering::AcqRel) {
            tracing::info!(
                directory = %self.directory.display(),
                streams = streams.len(),
                "Snapshot completed"
            );
        }
    }
}

enum SnapshotEntry {
    /// Directory reserved while its files are being written.
    Pending,
    Active(Arc<SnapshotState>),
}

/// Streams reported to a worker by one heartbeat.
#[derive(Debug, Clone, Default)]
pub struct StreamAssignments {
    /// Every unfinished stream the worker owns.
    pub snapshots: Vec<SnapshotTaskDef>,
    /// Streams that became the worker's during this heartbeat.
    pub assigned: Vec<SnapshotTaskDef>,
}

/// Tracks distributed snapshots by output directory.
pub struct SnapshotManager {
    storage: Arc<dyn AsyncStorageBackend>,
    engine: Arc<dyn SplitProviderFactory>,
    snapshots: RwLock<HashMap<PathBuf, SnapshotEntry>>,
    work_dir: Option<PathBuf>,
    recorded: Mutex<BTreeSet<PathBuf>>,
    max_concurrent_per_worker: usize,
    /// How long recovered streams wait for their previous owners.
    recovery_grace: Duration,
}

impl SnapshotManager {
    pub fn new(
        storage: Arc<dyn AsyncStorageBackend>,
        engine: Arc<dyn SplitProviderFactory>,
        settings: &DispatcherSettings,
    ) -> Self {
        Self {
            storage,
            engine,
            snapshots: RwLock::new(HashMap::new()),
            work_dir: settings.work_dir.clone(),
            recorded: Mutex::new(BTreeSet::new()),
            max_concurrent_per_worker: settings.worker_max_concurrent_snapshots,
            recovery_grace: Duration::from_millis(settings.worker_timeout_ms),
        }
    }

    /// Starts a snapshot of `graph` at `directory`.
    ///
    /// The snapshot becomes visible only after its metadata files and
    /// directory skeleton are on storage. Any failure leaves the directory
    /// unclaimed.
    pub async fn start(
        &self,
        graph: &DatasetGraph,
        directory: &Path,
        metadata: DistributedSnapshotMetadata,
    ) -> Result<()> {
        self.reserve(directory).await?;

        match self.initialize(graph, directory, metadata).await {
            Ok(state) => {
                tracing::info!(
                    directory = %directory.display(),
                    num_sources = state.num_sources(),
                    "Snapshot started"
                );
                self.publish(state).await;
                Ok(())
            }
            Err(e) => {
                self.release(directory).await;
                Err(e)
            }
        }
    }

    async fn initialize(
        &self,
        graph: &DatasetGraph,
        directory: &Path,
        distributed: DistributedSnapshotMetadata,
    ) -> Result<Arc<SnapshotState>> {
        let providers = self.engine.split_providers(graph)?;
        let metadata = SnapshotMetadata {
            distributed,
            num_sources: providers.len() as u64,
            created_at: Utc::now(),
        };

        self.storage
            .write(&paths::snapshot_metadata_path(directory), &metadata.to_bytes()?)
            .await?;
        self.storage
            .write(&paths::dataset_def_path(directory), graph.as_bytes())
            .await?;
        self.storage
            .create_dir_all(&paths::streams_directory(directory))
            .await?;
        self.storage
            .create_dir_all(&paths::committed_chunks_directory(directory))
            .await?;
        self.record_directory(directory).await?;

        let sources = providers
            .into_iter()
            .map(|provider| SourceState {
                inner: Mutex::new(SourceInner {
                    provider,
                    next_global_index: 0,
                }),
                exhausted: AtomicBool::new(false),
            })
            .collect();

        Ok(Arc::new(SnapshotState::new(
            directory.to_path_buf(),
            sources,
            Vec::new(),
            None,
        )))
    }

    /// Rebuilds a snapshot from what is on storage.
    ///
    /// Recovered streams start unowned. Until `worker_timeout_ms` has passed
    /// they can only be reclaimed by a worker reporting progress for them,
    /// and no new streams are created while any of them is unclaimed.
    pub async fn resume(&self, directory: &Path) -> Result<()> {
        self.reserve(directory).await?;

        match self.load(directory).await {
            Ok(state) => {
                self.publish(state).await;
                Ok(())
            }
            Err(e) => {
                self.release(directory).await;
                Err(e)
            }
        }
    }

    async fn load(&self, directory: &Path) -> Result<Arc<SnapshotState>> {
        let metadata = SnapshotMetadata::from_bytes(
            &self
                .storage
                .read(&paths::snapshot_metadata_path(directory))
                .await?,
        )?;
        let graph = DatasetGraph::new(self.storage.read(&paths::dataset_def_path(directory)).await?);

        let providers = self.engine.split_providers(&graph)?;
        let num_sources = providers.len();
        if num_sources as u64 != metadata.num_sources {
            return Err(DispatcherError::internal(format!(
                "snapshot at {} was started with {} sources but its dataset has {}",
                directory.display(),
                metadata.num_sources,
                num_sources
            )));
        }

        let num_streams = self
            .storage
            .list(&paths::streams_directory(directory))
            .await?
            .iter()
            .filter_map(|name| paths::parse_stream_directory_name(name))
            .max()
            .map_or(0, |max| max + 1);

        let mut persisted = vec![BTreeSet::<u64>::new(); num_sources];
        let mut streams = Vec::with_capacity(num_streams);
        for stream_index in 0..num_streams {
            let done = self
                .storage
                .exists(&paths::stream_done_path(directory, stream_index))
                .await?;

            let mut cursors = Vec::with_capacity(num_sources);
            for (source_index, global_indices) in persisted.iter_mut().enumerate() {
                let splits: Vec<(u64, u64)> = self
                    .storage
                    .list(&paths::source_directory(directory, stream_index, source_index))
                    .await?
                    .iter()
                    .filter_map(|name| paths::parse_split_file_name(name))
                    .collect();

                global_indices.extend(splits.iter().map(|(_, global)| *global));
                cursors.push(SourceCursor {
                    next_local_index: splits.iter().map(|(local, _)| local + 1).max().unwrap_or(0),
                    ..Default::default()
                });
            }
            streams.push(StreamState::with_cursors(cursors, None, done));
        }

        let mut sources = Vec::with_capacity(num_sources);
        for (source_index, (mut provider, global_indices)) in
            providers.into_iter().zip(persisted).enumerate()
        {
            // Indices are handed out before their files are written, so a
            // crash can leave gaps. Resume past the highest one; never reuse.
            let next_global_index = global_indices.last().map_or(0, |max| max + 1);
            if global_indices.len() as u64 != next_global_index {
                let missing: Vec<u64> = (0..next_global_index)
                    .filter(|index| !global_indices.contains(index))
                    .collect();
                tracing::warn!(
                    directory = %directory.display(),
                    source_index,
                    missing = ?missing,
                    "Splits were dispensed but never persisted; they are skipped"
                );
            }

            let skipped = provider.skip(next_global_index)?;
            sources.push(SourceState {
                inner: Mutex::new(SourceInner {
                    provider,
                    next_global_index,
                }),
                exhausted: AtomicBool::new(skipped < next_global_index),
            });
        }

        self.record_directory(directory).await?;

        tracing::info!(
            directory = %directory.display(),
            streams = streams.len(),
            done_streams = streams.iter().filter(|s| s.done).count(),
            "Snapshot recovered"
        );

        let state = Arc::new(SnapshotState::new(
            directory.to_path_buf(),
            sources,
            streams,
            Some(Instant::now()),
        ));
        state.refresh_completed().await;
        Ok(state)
    }

    /// Resumes every snapshot recorded in the work directory.
    ///
    /// Returns the number of snapshots recovered. A snapshot that fails to
    /// load is logged and skipped.
    pub async fn recover(&self) -> Result<usize> {
        let Some(work_dir) = &self.work_dir else {
            return Ok(0);
        };
        let path = work_dir.join(SNAPSHOT_DIRECTORIES_FILE_NAME);
        if !self.storage.exists(&path).await? {
            return Ok(0);
        }

        let directories: Vec<PathBuf> = bincode::deserialize(&self.storage.read(&path).await?)
            .map_err(|e| {
                DispatcherError::serialization_with_source("failed to decode snapshot directories", e)
            })?;
        self.recorded.lock().await.extend(directories.iter().cloned());

        let mut recovered = 0;
        for directory in directories {
            match self.resume(&directory).await {
                Ok(()) => recovered += 1,
                Err(e) => tracing::error!(
                    directory = %directory.display(),
                    error = %e,
                    "Failed to recover snapshot"
                ),
            }
        }
        Ok(recovered)
    }

    /// Dispenses the next split of `(stream_index, source_index)` and
    /// persists it under the stream's source directory.
    pub async fn get_snapshot_split(
        &self,
        directory: &Path,
        stream_index: usize,
        source_index: usize,
    ) -> Result<SnapshotSplit> {
        let state = self.active(directory).await?;
        if source_index >= state.num_sources() {
            return Err(DispatcherError::invalid_argument(format!(
                "Source index {source_index} out of range; snapshot at {} has {} sources",
                directory.display(),
                state.num_sources()
            )));
        }

        let cursors = {
            let streams = state.streams.read().await;
            let stream = streams.get(stream_index).ok_or_else(|| {
                DispatcherError::not_found(format!(
                    "Stream {stream_index} of snapshot at {} not found",
                    directory.display()
                ))
            })?;
            if stream.owner.is_none() {
                return Err(DispatcherError::not_found(format!(
                    "Stream {stream_index} of snapshot at {} is not assigned to a worker",
                    directory.display()
                )));
            }
            Arc::clone(&stream.cursors)
        };

        let mut cursor = cursors[source_index].lock().await;
        if cursor.end_of_splits {
            return Ok(SnapshotSplit::end_of_splits());
        }

        let split = match cursor.pending.take() {
            Some(pending) => pending,
            None => match state.next_split(source_index).await? {
                Some((global_index, payload)) => PendingSplit {
                    local_index: cursor.next_local_index,
                    global_index,
                    payload,
                },
                None => {
                    cursor.end_of_splits = true;
                    tracing::debug!(
                        directory = %directory.display(),
                        stream_index,
                        source_index,
                        "End of splits"
                    );
                    return Ok(SnapshotSplit::end_of_splits());
                }
            },
        };

        let path = paths::split_path(
            directory,
            stream_index,
            source_index,
            split.local_index,
            split.global_index,
        );
        if let Err(e) = self.storage.write(&path, &split.payload).await {
            // Offer the same split again on the next call
            cursor.pending = Some(split);
            return Err(e);
        }

        cursor.next_local_index = split.local_index + 1;
        Ok(SnapshotSplit {
            split: Some(split.payload),
            local_split_index: split.local_index,
            end_of_splits: false,
        })
    }

    /// Applies a worker's snapshot progress and hands out streams.
    ///
    /// `unhealthy` holds the addresses of workers that stopped heartbeating;
    /// their unfinished streams go to the next worker that asks.
    pub async fn worker_heartbeat(
        &self,
        worker: &str,
        progress: &[SnapshotTaskProgress],
        unhealthy: &HashSet<String>,
    ) -> Result<StreamAssignments> {
        for report in progress {
            self.apply_progress(worker, report).await?;
        }

        let active = self.active_snapshots().await;

        let mut owns_stream = Vec::with_capacity(active.len());
        for state in &active {
            let streams = state.streams.read().await;
            owns_stream.push(streams.iter().any(|s| s.is_owned_by(worker) && !s.done));
        }
        let mut load = owns_stream.iter().filter(|owned| **owned).count();

        let mut assignments = StreamAssignments::default();
        for (state, owned) in active.iter().zip(owns_stream) {
            if owned || state.completed.load(Ordering::Acquire) {
                continue;
            }
            if self.max_concurrent_per_worker > 0 && load >= self.max_concurrent_per_worker {
                continue;
            }
            if let Some(stream_index) = self.assign_stream(state, worker, unhealthy).await? {
                load += 1;
                assignments.assigned.push(state.task_def(stream_index));
            }
        }

        for state in &active {
            let streams = state.streams.read().await;
            assignments.snapshots.extend(
                streams
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| s.is_owned_by(worker) && !s.done)
                    .map(|(index, _)| state.task_def(index)),
            );
        }

        Ok(assignments)
    }

    async fn apply_progress(&self, worker: &str, report: &SnapshotTaskProgress) -> Result<()> {
        let Some(state) = self.try_active(&report.directory).await else {
            tracing::warn!(
                worker,
                directory = %report.directory.display(),
                "Progress reported for unknown snapshot"
            );
            return Ok(());
        };

        let _assignment = state.assignment.lock().await;
        {
            let mut streams = state.streams.write().await;
            if report.stream_index >= streams.len() {
                tracing::warn!(
                    worker,
                    directory = %report.directory.display(),
                    stream_index = report.stream_index,
                    "Progress reported for unknown stream"
                );
                return Ok(());
            }
            let holds_other = streams.iter().enumerate().any(|(index, s)| {
                index != report.stream_index && s.is_owned_by(worker) && !s.done
            });

            let stream = &mut streams[report.stream_index];
            match stream.owner.as_deref() {
                Some(owner) if owner == worker => {}
                Some(owner) => {
                    tracing::debug!(
                        worker,
                        owner,
                        stream_index = report.stream_index,
                        "Ignoring progress for stream owned by another worker"
                    );
                    return Ok(());
                }
                None if holds_other => {
                    tracing::warn!(
                        worker,
                        directory = %report.directory.display(),
                        stream_index = report.stream_index,
                        "Refusing reclaim; worker already owns a stream of this snapshot"
                    );
                    return Ok(());
                }
                None => {
                    tracing::info!(
                        worker,
                        directory = %report.directory.display(),
                        stream_index = report.stream_index,
                        "Worker reclaimed stream"
                    );
                    stream.owner = Some(worker.to_string());
                }
            }

            if !report.completed {
                return Ok(());
            }
            if !stream.done {
                stream.done = true;
                tracing::info!(
                    worker,
                    directory = %report.directory.display(),
                    stream_index = report.stream_index,
                    "Stream completed"
                );
            }
        }

        let done_path = paths::stream_done_path(&state.directory, report.stream_index);
        if !self.storage.exists(&done_path).await? {
            self.storage.write(&done_path, b"").await?;
        }
        state.refresh_completed().await;
        Ok(())
    }

    /// Gives `worker` an orphaned stream or a new one. Returns `None` when
    /// the snapshot has no work left to hand out.
    async fn assign_stream(
        &self,
        state: &SnapshotState,
        worker: &str,
        unhealthy: &HashSet<String>,
    ) -> Result<Option<usize>> {
        let _assignment = state.assignment.lock().await;

        let stream_index = {
            let mut streams = state.streams.write().await;
            if let Some(index) = streams.iter().position(|s| s.is_owned_by(worker) && !s.done) {
                return Ok(Some(index));
            }

            let in_grace = state
                .recovered_at
                .is_some_and(|at| at.elapsed() < self.recovery_grace);
            let orphan = streams.iter().position(|s| {
                !s.done
                    && match &s.owner {
                        Some(owner) => unhealthy.contains(owner),
                        None => !in_grace,
                    }
            });
            if let Some(index) = orphan {
                let previous = streams[index].owner.replace(worker.to_string());
                tracing::info!(
                    worker,
                    previous_owner = previous.as_deref().unwrap_or(""),
                    directory = %state.directory.display(),
                    stream_index = index,
                    "Orphaned stream reassigned"
                );
                return Ok(Some(index));
            }

            if state.all_sources_exhausted() {
                return Ok(None);
            }
            if in_grace && streams.iter().any(|s| !s.done && s.owner.is_none()) {
                return Ok(None);
            }
            streams.len()
        };

        // The skeleton must exist before the worker hears about the stream.
        let directory = &state.directory;
        for source_index in 0..state.num_sources() {
            self.storage
                .create_dir_all(&paths::source_directory(directory, stream_index, source_index))
                .await?;
        }
        self.storage
            .create_dir_all(&paths::checkpoints_directory(directory, stream_index))
            .await?;
        self.storage
            .create_dir_all(&paths::uncommitted_chunks_directory(directory, stream_index))
            .await?;

        state
            .streams
            .write()
            .await
            .push(StreamState::new(state.num_sources(), Some(worker.to_string())));

        tracing::info!(
            worker,
            directory = %directory.display(),
            stream_index,
            "Stream assigned"
        );
        Ok(Some(stream_index))
    }

    /// Lists the streams of a snapshot.
    pub async fn snapshot_streams(&self, directory: &Path) -> Result<Vec<SnapshotStreamInfo>> {
        let state = self.active(directory).await?;
        let streams = state.streams.read().await;
        Ok(streams
            .iter()
            .enumerate()
            .map(|(stream_index, s)| SnapshotStreamInfo {
                stream_index,
                owner: s.owner.clone(),
                done: s.done,
            })
            .collect())
    }

    /// True once every source is exhausted and every stream is done.
    #[cfg(test)]
    pub async fn is_completed(&self, directory: &Path) -> Result<bool> {
        Ok(self.active(directory).await?.completed.load(Ordering::Acquire))
    }

    #[cfg(test)]
    pub async fn contains(&self, directory: &Path) -> bool {
        self.snapshots.read().await.contains_key(directory)
    }

    async fn reserve(&self, directory: &Path) -> Result<()> {
        let mut snapshots = self.snapshots.write().await;
        if snapshots.contains_key(directory) {
            return Err(DispatcherError::invalid_argument(format!(
                "Snapshot at directory {} already started",
                directory.display()
            )));
        }
        snapshots.insert(directory.to_path_buf(), SnapshotEntry::Pending);
        Ok(())
    }

    async fn release(&self, directory: &Path) {
        self.snapshots.write().await.remove(directory);
    }

    async fn publish(&self, state: Arc<SnapshotState>) {
        self.snapshots
            .write()
            .await
            .insert(state.directory.clone(), SnapshotEntry::Active(state));
    }

    async fn try_active(&self, directory: &Path) -> Option<Arc<SnapshotState>> {
        match self.snapshots.read().await.get(directory) {
            Some(SnapshotEntry::Active(state)) => Some(Arc::clone(state)),
            _ => None,
        }
    }

    async fn active(&self, directory: &Path) -> Result<Arc<SnapshotState>> {
        self.try_active(directory).await.ok_or_else(|| {
            DispatcherError::not_found(format!(
                "Snapshot at directory {} not found",
                directory.display()
            ))
        })
    }

    /// Started snapshots ordered by directory.
    async fn active_snapshots(&self) -> Vec<Arc<SnapshotState>> {
        let snapshots = self.snapshots.read().await;
        let mut active: Vec<_> = snapshots
            .values()
            .filter_map(|entry| match entry {
                SnapshotEntry::Active(state) => Some(Arc::clone(state)),
                SnapshotEntry::Pending => None,
            })
            .collect();
        active.sort_by(|a, b| a.directory.cmp(&b.directory));
        active
    }

    async fn record_directory(&self, directory: &Path) -> Result<()> {
        let Some(work_dir) = &self.work_dir else {
            return Ok(());
        };

        let mut recorded = self.recorded.lock().await;
        if !recorded.insert(directory.to_path_buf()) {
            return Ok(());
        }

        let directories: Vec<&PathBuf> = recorded.iter().collect();
        let written = match bincode::serialize(&directories) {
            Ok(bytes) => {
                self.storage
                    .write(&work_dir.join(SNAPSHOT_DIRECTORIES_FILE_NAME), &bytes)
                    .await
            }
            Err(e) => Err(DispatcherError::serialization_with_source(
                "failed to encode snapshot directories",
                e,
            )),
        };
        if written.is_err() {
            recorded.remove(directory);
        }
        written
    }
}
