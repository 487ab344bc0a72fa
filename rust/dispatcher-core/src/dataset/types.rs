// rust/dispatcher-core/src/dataset/types.rs

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{DispatcherError, Result};

/// Compression applied to dataset elements before they leave a worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Compression {
    #[default]
    Unspecified,
    Off,
    Snappy,
}

/// Number of elements a dataset produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    Known(u64),
    #[default]
    Unknown,
    Infinite,
}

impl Cardinality {
    /// Wire value used for an infinite dataset.
    pub const INFINITE: i64 = -1;
    /// Wire value used when the cardinality cannot be determined.
    pub const UNKNOWN: i64 = -2;

    pub fn from_i64(value: i64) -> Self {
        match value {
            Self::INFINITE => Self::Infinite,
            v if v >= 0 => Self::Known(v as u64),
            _ => Self::Unknown,
        }
    }

    pub fn to_i64(self) -> i64 {
        match self {
            Self::Known(n) => i64::try_from(n).unwrap_or(i64::MAX),
            Self::Unknown => Self::UNKNOWN,
            Self::Infinite => Self::INFINITE,
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(n) => write!(f, "{n}"),
            Self::Unknown => f.write_str("unknown"),
            Self::Infinite => f.write_str("infinite"),
        }
    }
}

/// Metadata a client attaches to a registered dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataServiceMetadata {
    /// Serialized description of the element structure, opaque to the dispatcher.
    pub element_spec: Vec<u8>,
    pub compression: Compression,
    pub cardinality: Cardinality,
}

/// One input-producing branch of a dataset graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceDef {
    /// Integers from `start` in increments of `step`. `stop = None` never ends.
    Range {
        start: i64,
        stop: Option<i64>,
        step: i64,
    },
    /// One split per file path.
    Files { paths: Vec<String> },
}

/// Decoded form of a graph understood by the built-in split providers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDef {
    pub sources: Vec<SourceDef>,
}

impl GraphDef {
    pub fn encode(&self) -> Result<Bytes> {
        bincode::serialize(self)
            .map(Bytes::from)
            .map_err(|e| DispatcherError::serialization_with_source("failed to encode graph", e))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| {
            DispatcherError::invalid_argument(format!("failed to decode dataset graph: {e}"))
        })
    }
}

/// Serialized computation graph of a dataset.
///
/// The dispatcher treats the bytes as opaque; only the split provider
/// factory interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetGraph(Bytes);

impl DatasetGraph {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn from_sources(sources: Vec<SourceDef>) -> Result<Self> {
        GraphDef { sources }.encode().map(Self)
    }

    /// A single-source graph producing `0..n`.
    pub fn range(n: i64) -> Result<Self> {
        Self::from_sources(vec![SourceDef::Range {
            start: 0,
            stop: Some(n),
            step: 1,
        }])
    }

    /// A single-source graph that never runs out of splits.
    pub fn infinite() -> Result<Self> {
        Self::from_sources(vec![SourceDef::Range {
            start: 0,
            stop: None,
            step: 1,
        }])
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Bytes> for DatasetGraph {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

/// A registered dataset. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRecord {
    pub dataset_id: String,
    pub graph: DatasetGraph,
    pub metadata: DataServiceMetadata,
}

impl DatasetRecord {
    /// True if `graph` and `metadata` describe the same dataset as this record.
    pub fn same_structure(&self, graph: &DatasetGraph, metadata: &DataServiceMetadata) -> bool {
        self.graph == *graph && self.metadata == *metadata
    }
}
