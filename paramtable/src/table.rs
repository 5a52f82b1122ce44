use crate::Result;

/// Element type held by a table's rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    F32,
    F64,
}

/// A key-addressed accumulation service for flat model parameters.
///
/// A table is a set of partition rows, one per worker, covering the
/// flattened parameter space. Workers accumulate weighted deltas into
/// individual rows and pull the merged values of every row back in one
/// batch. The service is opaque: callers never observe how or where the
/// rows are stored.
#[trait_variant::make(ParameterTable: Send)]
pub trait ParameterTableTemplate {
    /// Declares a table's partition geometry.
    ///
    /// Called once per worker before any other operation on `table_id`.
    /// Repeating the call with the same geometry is a no-op.
    ///
    /// # Arguments
    /// * `table_id` - The table to configure.
    /// * `partitions` - Number of partition rows.
    /// * `max_partition_len` - Element capacity of the largest row.
    /// * `kind` - Element type of the rows.
    ///
    /// # Returns
    /// An error if `table_id` was already configured with a different
    /// geometry.
    async fn configure(
        &self,
        table_id: usize,
        partitions: usize,
        max_partition_len: usize,
        kind: ElementKind,
    ) -> Result<()>;

    /// Accumulates `weight * delta` into a partition row.
    ///
    /// # Arguments
    /// * `table_id` - The target table.
    /// * `partition` - The row to accumulate into.
    /// * `delta` - The outgoing difference, addressed from the row's start.
    /// * `weight` - Scale applied to `delta` before accumulation.
    ///
    /// # Returns
    /// An error if the table or partition does not exist, or `delta`
    /// exceeds the row's capacity.
    async fn add(
        &self,
        table_id: usize,
        partition: usize,
        delta: &[f32],
        weight: f32,
    ) -> Result<()>;

    /// Copies the current merged values of every row into `out`.
    ///
    /// Row `p` lands at `out[offsets[p]..offsets[p] + sizes[p]]`.
    ///
    /// # Arguments
    /// * `table_id` - The table to read.
    /// * `out` - Destination buffer spanning the full parameter space.
    /// * `offsets` - Per-partition destination offsets, ascending.
    /// * `sizes` - Per-partition element counts.
    ///
    /// # Returns
    /// An error if the table does not exist or the partition map does
    /// not fit `out`.
    async fn batch_load(
        &self,
        table_id: usize,
        out: &mut [f32],
        offsets: &[usize],
        sizes: &[usize],
    ) -> Result<()>;

    /// Blocks until every participating worker reaches the barrier.
    async fn barrier(&self) -> Result<()>;
}
