// rust/dispatcher-core/src/dataset/mod.rs

//! Dataset registration and the split provider boundary.
//!
//! Datasets are registered once and are immutable afterwards. Registering
//! under an existing id either returns that id (identical graph and
//! metadata) or fails with `InvalidArgument`.
//!
//! The dispatcher never executes a dataset graph. It only asks a
//! [`SplitProviderFactory`] for one [`SplitProvider`] per source and hands
//! the resulting splits to workers.

mod registry;
mod split_provider;
mod types;

pub use registry::DatasetRegistry;
pub use split_provider::{
    FileSplitProvider, GraphSplitProviderFactory, RangeSplitProvider, SplitProvider,
    SplitProviderFactory,
};
pub use types::{
    Cardinality, Compression, DataServiceMetadata, DatasetGraph, DatasetRecord, GraphDef,
    SourceDef,
};
