// rust/dispatcher-core/src/dataset/split_provider.rs

use bytes::Bytes;

use super::types::{DatasetGraph, GraphDef, SourceDef};
use crate::error::{DispatcherError, Result};

/// Produces the ordered splits of one dataset source.
pub trait SplitProvider: Send {
    /// Returns the next split, or `None` once the source is exhausted.
    fn next(&mut self) -> Result<Option<Bytes>>;

    /// Rewinds to the first split.
    fn reset(&mut self) -> Result<()>;

    /// Discards up to `n` splits and returns how many were discarded.
    fn skip(&mut self, n: u64) -> Result<u64> {
        let mut skipped = 0;
        while skipped < n {
            if self.next()?.is_none() {
                break;
            }
            skipped += 1;
        }
        Ok(skipped)
    }

    /// Total number of splits, if finite and known.
    fn cardinality(&self) -> Option<u64>;
}

/// Builds split providers for a dataset graph, one per source in source order.
pub trait SplitProviderFactory: Send + Sync {
    fn split_providers(&self, graph: &DatasetGraph) -> Result<Vec<Box<dyn SplitProvider>>>;
}

/// Splits of an integer range, each encoded as a little-endian `i64`.
#[derive(Debug, Clone)]
pub struct RangeSplitProvider {
    start: i64,
    stop: Option<i64>,
    step: i64,
    next: Option<i64>,
}

impl RangeSplitProvider {
    pub fn new(start: i64, stop: Option<i64>, step: i64) -> Result<Self> {
        if step == 0 {
            return Err(DispatcherError::invalid_argument(
                "range source step must be non-zero",
            ));
        }
        Ok(Self {
            start,
            stop,
            step,
            next: Some(start),
        })
    }

    fn in_range(&self, value: i64) -> bool {
        match self.stop {
            None => true,
            Some(stop) if self.step > 0 => value < stop,
            Some(stop) => value > stop,
        }
    }
}

impl SplitProvider for RangeSplitProvider {
    fn next(&mut self) -> Result<Option<Bytes>> {
        let Some(value) = self.next.filter(|v| self.in_range(*v)) else {
            self.next = None;
            return Ok(None);
        };
        // Overflow ends the range.
        self.next = value.checked_add(self.step);
        Ok(Some(Bytes::copy_from_slice(&value.to_le_bytes())))
    }

    fn reset(&mut self) -> Result<()> {
        self.next = Some(self.start);
        Ok(())
    }

    fn cardinality(&self) -> Option<u64> {
        let stop = self.stop?;
        let (span, step) = if self.step > 0 {
            (i128::from(stop) - i128::from(self.start), i128::from(self.step))
        } else {
            (i128::from(self.start) - i128::from(stop), -i128::from(self.step))
        };
        if span <= 0 {
            return Some(0);
        }
        u64::try_from((span + step - 1) / step).ok()
    }
}

/// One split per file path, each the UTF-8 bytes of the path.
#[derive(Debug, Clone)]
pub struct FileSplitProvider {
    paths: Vec<String>,
    position: usize,
}

impl FileSplitProvider {
    pub fn new(paths: Vec<String>) -> Self {
        Self { paths, position: 0 }
    }
}

impl SplitProvider for FileSplitProvider {
    fn next(&mut self) -> Result<Option<Bytes>> {
        let split = self
            .paths
            .get(self.position)
            .map(|p| Bytes::copy_from_slice(p.as_bytes()));
        if split.is_some() {
            self.position += 1;
        }
        Ok(split)
    }

    fn reset(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }

    fn skip(&mut self, n: u64) -> Result<u64> {
        let remaining = (self.paths.len() - self.position) as u64;
        let skipped = n.min(remaining);
        self.position += skipped as usize;
        Ok(skipped)
    }

    fn cardinality(&self) -> Option<u64> {
        Some(self.paths.len() as u64)
    }
}

/// Split provider factory for graphs encoded as [`GraphDef`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphSplitProviderFactory;

impl SplitProviderFactory for GraphSplitProviderFactory {
    fn split_providers(&self, graph: &DatasetGraph) -> Result<Vec<Box<dyn SplitProvider>>> {
        let def = GraphDef::decode(graph.as_bytes())?;
        def.sources
            .into_iter()
            .map(|source| -> Result<Box<dyn SplitProvider>> {
                match source {
                    SourceDef::Range { start, stop, step } => {
                        Ok(Box::new(RangeSplitProvider::new(start, stop, step)?))
                    }
                    SourceDef::Files { paths } => Ok(Box::new(FileSplitProvider::new(paths))),
                }
            })
            .collect()
    }
}
