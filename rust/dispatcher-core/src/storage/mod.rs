// rust/dispatcher-core/src/storage/mod.rs

//! Storage abstraction for snapshot state.
//!
//! The dispatcher persists snapshot metadata, split files and stream markers
//! through [`AsyncStorageBackend`], so the on-disk layout can live on any
//! filesystem the workers share. [`AsyncLocalStorage`] is the local
//! filesystem implementation backed by `tokio::fs`.
//!
//! # Example
//!
//! ```no_run
//! use dispatcher_core::config::StorageConfig;
//! use dispatcher_core::storage::{AsyncLocalStorage, AsyncStorageBackend};
//! use std::path::Path;
//!
//! # async fn example() -> dispatcher_core::Result<()> {
//! let storage = AsyncLocalStorage::new(&StorageConfig::default()).await?;
//!
//! storage.write(Path::new("snap/snapshot.metadata"), b"metadata").await?;
//! let content = storage.read(Path::new("snap/snapshot.metadata")).await?;
//! assert_eq!(&content[..], b"metadata");
//! # Ok(())
//! # }
//! ```

mod local;
mod traits;

pub use local::AsyncLocalStorage;
pub use traits::{AsyncStorageBackend, ObjectMeta};
