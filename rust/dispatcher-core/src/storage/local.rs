// rust/dispatcher-core/src/storage/local.rs

//! Async local filesystem storage backend implementation.
//!
//! This module provides a storage backend that uses the local filesystem
//! via tokio's async filesystem operations.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};

use super::traits::{AsyncStorageBackend, ObjectMeta};
use crate::config::StorageConfig;
use crate::error::{DispatcherError, Result};

/// Distinguishes concurrent temp files written by this process.
static TEMP_FILE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Async local filesystem storage backend.
///
/// Relative paths resolve against the configured base path; absolute paths
/// are used as they are.
pub struct AsyncLocalStorage {
    /// Base path for relative storage paths.
    base_path: PathBuf,
    /// Buffer size for buffered writes.
    buffer_size: usize,
}

impl AsyncLocalStorage {
    /// Creates a new `AsyncLocalStorage` instance from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the base path cannot be created.
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        let base_path = config.base_path.clone();

        if !fs::try_exists(&base_path).await.unwrap_or(false) {
            fs::create_dir_all(&base_path).await.map_err(|e| {
                DispatcherError::storage_with_source(&base_path, "failed to create base directory", e)
            })?;
        }

        Ok(Self {
            base_path,
            buffer_size: config.buffer_size,
        })
    }

    /// Resolves a path relative to the base path.
    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }

    /// Temp file path next to `target`, so the final rename stays on one filesystem.
    fn temp_path_for(target: &Path) -> PathBuf {
        let counter = TEMP_FILE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        target.with_file_name(format!(
            ".{file_name}.tmp-{}-{counter}",
            std::process::id()
        ))
    }

    async fn write_temp(&self, temp_path: &Path, data: &[u8]) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(temp_path)
            .await
            .map_err(|e| {
                DispatcherError::storage_with_source(temp_path, "failed to create file", e)
            })?;

        let mut writer = BufWriter::with_capacity(self.buffer_size, file);
        writer.write_all(data).await.map_err(|e| {
            DispatcherError::storage_with_source(temp_path, "failed to write file", e)
        })?;
        writer.flush().await.map_err(|e| {
            DispatcherError::storage_with_source(temp_path, "failed to flush writer", e)
        })?;

        // Sync to disk
        writer.get_ref().sync_all().await.map_err(|e| {
            DispatcherError::storage_with_source(temp_path, "failed to sync file to disk", e)
        })
    }
}

#[async_trait]
impl AsyncStorageBackend for AsyncLocalStorage {
    async fn exists(&self, path: &Path) -> Result<bool> {
        let full_path = self.resolve_path(path);
        fs::try_exists(&full_path).await.map_err(|e| {
            DispatcherError::storage_with_source(&full_path, "failed to check existence", e)
        })
    }

    async fn metadata(&self, path: &Path) -> Result<ObjectMeta> {
        let full_path = self.resolve_path(path);
        let meta = fs::metadata(&full_path).await.map_err(|e| {
            DispatcherError::storage_with_source(&full_path, "failed to read metadata", e)
        })?;

        Ok(ObjectMeta {
            size: meta.len(),
            is_dir: meta.is_dir(),
        })
    }

    async fn read(&self, path: &Path) -> Result<Bytes> {
        let full_path = self.resolve_path(path);
        let content = fs::read(&full_path).await.map_err(|e| {
            DispatcherError::storage_with_source(&full_path, "failed to read file", e)
        })?;
        Ok(Bytes::from(content))
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let full_path = self.resolve_path(path);

        // Create parent directories if needed
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                DispatcherError::storage_with_source(
                    parent,
                    "failed to create parent directories",
                    e,
                )
            })?;
        }

        let temp_path = Self::temp_path_for(&full_path);
        if let Err(e) = self.write_temp(&temp_path, data).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_path, &full_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(DispatcherError::storage_with_source(
                &temp_path,
                format!("failed to rename to {}", full_path.display()),
                e,
            ));
        }
        Ok(())
    }

    async fn list(&self, prefix: &Path) -> Result<Vec<String>> {
        let full_path = self.resolve_path(prefix);

        let meta = match fs::metadata(&full_path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(DispatcherError::storage_with_source(
                    &full_path,
                    "failed to read metadata",
                    e,
                ))
            }
        };

        if !meta.is_dir() {
            return Err(DispatcherError::storage(&full_path, "path is not a directory"));
        }

        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&full_path).await.map_err(|e| {
            DispatcherError::storage_with_source(&full_path, "failed to read directory", e)
        })?;

        while let Some(entry) = dir.next_entry().await.map_err(|e| {
            DispatcherError::storage_with_source(&full_path, "failed to read directory entry", e)
        })? {
            if let Some(name) = entry.file_name().to_str() {
                entries.push(name.to_string());
            }
        }

        entries.sort();
        Ok(entries)
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        let full_path = self.resolve_path(path);
        fs::create_dir_all(&full_path).await.map_err(|e| {
            DispatcherError::storage_with_source(&full_path, "failed to create directories", e)
        })
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let full_path = self.resolve_path(path);

        let meta = fs::metadata(&full_path).await.map_err(|e| {
            DispatcherError::storage_with_source(&full_path, "failed to read metadata", e)
        })?;

        if meta.is_dir() {
            fs::remove_dir_all(&full_path).await.map_err(|e| {
                DispatcherError::storage_with_source(&full_path, "failed to delete directory", e)
            })
        } else {
            fs::remove_file(&full_path).await.map_err(|e| {
                DispatcherError::storage_with_source(&full_path, "failed to delete file", e)
            })
        }
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}
