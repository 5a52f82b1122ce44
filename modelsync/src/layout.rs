use std::ops::Range;

use crate::error::{Result, SyncErr};

/// Flattened layout of every trainable tensor.
///
/// Offsets are a prefix sum over the tensor lengths, so tensor slices
/// are disjoint, contiguous and cover `[0, total_len)`. Planned once
/// before training starts and immutable for the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamLayout {
    lengths: Vec<usize>,
    offsets: Vec<usize>,
    total_len: usize,
}

impl ParamLayout {
    /// Plans the flat layout for tensors of the given lengths.
    ///
    /// # Arguments
    /// * `lengths` - Element count of each trainable tensor, in model order.
    ///
    /// # Returns
    /// A `Config` error if `lengths` is empty.
    pub fn plan(lengths: &[usize]) -> Result<Self> {
        if lengths.is_empty() {
            return Err(SyncErr::Config {
                reason: "the trainable parameter set is empty",
            });
        }

        let mut offsets = Vec::with_capacity(lengths.len());
        let mut offset = 0;
        for &len in lengths {
            offsets.push(offset);
            offset += len;
        }

        Ok(Self {
            lengths: lengths.to_vec(),
            offsets,
            total_len: offset,
        })
    }

    /// Total number of flattened elements.
    pub fn total_len(&self) -> usize {
        self.total_len
    }

    /// Number of tensors in the layout.
    pub fn tensor_count(&self) -> usize {
        self.lengths.len()
    }

    /// The flat range covered by tensor `i`.
    pub fn range(&self, i: usize) -> Range<usize> {
        self.offsets[i]..self.offsets[i] + self.lengths[i]
    }

    /// Per-tensor flat offsets.
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }
}

/// Contiguous near-equal split of the flat space across workers.
///
/// Partition `p` addresses row `p` of the parameter table. The
/// `total_len % workers` remainder is distributed one element each to
/// the lowest-indexed partitions, so no two sizes differ by more than 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionMap {
    offsets: Vec<usize>,
    sizes: Vec<usize>,
}

impl PartitionMap {
    /// Splits `[0, total_len)` into `workers` contiguous partitions.
    ///
    /// # Arguments
    /// * `total_len` - Flattened length of the parameter space.
    /// * `workers` - Number of partitions, one per worker; must be nonzero.
    pub fn new(total_len: usize, workers: usize) -> Self {
        let base = total_len / workers;
        let remainder = total_len % workers;

        let mut offsets = Vec::with_capacity(workers);
        let mut sizes = Vec::with_capacity(workers);
        let mut offset = 0;
        for w in 0..workers {
            let size = if w < remainder { base + 1 } else { base };
            offsets.push(offset);
            sizes.push(size);
            offset += size;
        }

        Self { offsets, sizes }
    }

    /// Number of partitions.
    pub fn partitions(&self) -> usize {
        self.offsets.len()
    }

    /// The flat range owned by partition `p`.
    pub fn range(&self, p: usize) -> Range<usize> {
        self.offsets[p]..self.offsets[p] + self.sizes[p]
    }

    /// Per-partition flat offsets, ascending.
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Per-partition element counts.
    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// Element capacity of the largest partition.
    pub fn max_len(&self) -> usize {
        self.sizes.first().copied().unwrap_or(0)
    }
}
