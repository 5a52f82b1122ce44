use parking_lot::RwLock;

use crate::{Result, TableErr};

/// One accumulation row of a table partition.
///
/// Rows are sized to the table's maximum partition length; partitions
/// shorter than that address the row's prefix.
#[derive(Debug)]
pub struct PartitionRow {
    values: RwLock<Box<[f32]>>,
}

impl PartitionRow {
    /// Creates a zeroed row of `len` elements.
    pub fn new(len: usize) -> Self {
        Self {
            values: RwLock::new(vec![0.0; len].into_boxed_slice()),
        }
    }

    /// Accumulates `weight * delta` into the row's prefix.
    ///
    /// # Arguments
    /// * `delta` - The values to accumulate, at most the row's length.
    /// * `weight` - Scale applied to `delta` before accumulation.
    ///
    /// # Returns
    /// A `SizeMismatch` error if `delta` exceeds the row's capacity.
    pub fn add(&self, delta: &[f32], weight: f32) -> Result<()> {
        let mut values = self.values.write();

        if delta.len() > values.len() {
            return Err(TableErr::SizeMismatch {
                what: "delta",
                got: delta.len(),
                expected: values.len(),
            });
        }

        values
            .iter_mut()
            .zip(delta)
            .for_each(|(v, d)| *v += weight * d);

        Ok(())
    }

    /// Copies the first `out.len()` values of the row into `out`.
    ///
    /// # Arguments
    /// * `out` - A mutable slice, at most the row's length.
    ///
    /// # Returns
    /// A `SizeMismatch` error if `out` exceeds the row's capacity.
    pub fn load_into(&self, out: &mut [f32]) -> Result<()> {
        let values = self.values.read();

        if out.len() > values.len() {
            return Err(TableErr::SizeMismatch {
                what: "out",
                got: out.len(),
                expected: values.len(),
            });
        }

        out.copy_from_slice(&values[..out.len()]);
        Ok(())
    }
}
