// rust/dispatcher-core/src/snapshot/mod.rs

//! Distributed snapshots.
//!
//! A snapshot materializes a dataset under a directory on shared storage.
//! Workers each own one stream of a snapshot and pull splits for it from the
//! dispatcher. Every split handed out is written under the stream's
//! directory before it is returned, so a restarted dispatcher can rebuild
//! its cursors from storage alone.
//!
//! Layout of a snapshot directory:
//!
//! ```text
//! <snapshot>/
//!   snapshot.metadata
//!   dataset_def.proto
//!   committed_chunks/
//!   streams/stream_<i>/
//!     DONE
//!     checkpoints/
//!     uncommitted_chunks/
//!     splits/source_<s>/split_<local>_<global>
//! ```

mod manager;
mod metadata;
pub mod paths;

pub use manager::{SnapshotManager, StreamAssignments};
pub use metadata::{DistributedSnapshotMetadata, SnapshotMetadata};
