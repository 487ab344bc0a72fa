// rust/dispatcher-core/src/job/mod.rs

//! Job and iteration bookkeeping.
//!
//! A job ties a dataset to a processing mode. Named jobs are shared: asking
//! for a name again returns the existing job when its parameters match and
//! fails with `InvalidArgument` otherwise. Each job runs as one or more
//! iterations, memoized by repetition number.

mod registry;
mod types;

pub use registry::JobRegistry;
pub use types::{Iteration, Job, ProcessingMode, ShardingPolicy, SplitResult, TargetWorkers};
