// rust/dispatcher-core/src/storage/traits.rs

//! Async storage abstraction trait used by the dispatcher.

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Metadata about a stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Size of the object in bytes.
    pub size: u64,
    /// Whether this object is a directory.
    pub is_dir: bool,
}

/// The storage backend the dispatcher persists snapshot state through.
///
/// # Object Safety
///
/// This trait is object-safe and can be used with `Arc<dyn AsyncStorageBackend>`.
#[async_trait]
pub trait AsyncStorageBackend: Send + Sync {
    /// Checks if an object exists at the given path.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Retrieves metadata for an object.
    ///
    /// # Errors
    ///
    /// Returns an error if the object doesn't exist or metadata cannot be read.
    async fn metadata(&self, path: &Path) -> Result<ObjectMeta>;

    /// Reads the whole object into memory.
    async fn read(&self, path: &Path) -> Result<Bytes>;

    /// Writes an object, replacing any previous content.
    ///
    /// The write is atomic: readers observe either the old content or the
    /// complete new content, never a partial file. Parent directories are
    /// created if they don't exist.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Lists the entry names directly under `prefix`, sorted.
    ///
    /// A missing directory lists as empty.
    async fn list(&self, prefix: &Path) -> Result<Vec<String>>;

    /// Creates a directory and all parent directories.
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Deletes a file or a directory tree.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Returns the backend type name.
    fn backend_type(&self) -> &'static str;
}
