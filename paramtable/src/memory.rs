use std::collections::HashMap;

use log::debug;
use parking_lot::RwLock;
use rayon::prelude::*;
use tokio::{sync::Barrier, task};

use crate::{ElementKind, ParameterTable, PartitionRow, Result, TableErr};

/// Geometry and storage of one configured table.
#[derive(Debug)]
struct TableState {
    rows: Vec<PartitionRow>,
    max_partition_len: usize,
    kind: ElementKind,
}

/// In-process reference implementation of the parameter-table service.
///
/// One instance is shared by every worker of a simulated cluster; it is
/// the accumulation endpoint the synchronization engine is a client of.
/// Rows live behind per-row locks so concurrent workers only contend on
/// the partitions they actually touch.
pub struct MemoryTable {
    tables: RwLock<HashMap<usize, TableState>>,
    barrier: Barrier,
}

impl MemoryTable {
    /// Creates a table service shared by `workers` participants.
    ///
    /// # Arguments
    /// * `workers` - Number of workers the barrier waits for.
    pub fn new(workers: usize) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            barrier: Barrier::new(workers),
        }
    }
}

impl ParameterTable for MemoryTable {
    async fn configure(
        &self,
        table_id: usize,
        partitions: usize,
        max_partition_len: usize,
        kind: ElementKind,
    ) -> Result<()> {
        let mut tables = self.tables.write();

        if let Some(existing) = tables.get(&table_id) {
            if existing.rows.len() != partitions
                || existing.max_partition_len != max_partition_len
                || existing.kind != kind
            {
                return Err(TableErr::Reconfigured {
                    table_id,
                    got: partitions,
                    expected: existing.rows.len(),
                });
            }
            return Ok(());
        }

        debug!(table_id = table_id, partitions = partitions; "configuring table");
        let rows = (0..partitions)
            .map(|_| PartitionRow::new(max_partition_len))
            .collect();
        tables.insert(
            table_id,
            TableState {
                rows,
                max_partition_len,
                kind,
            },
        );

        Ok(())
    }

    async fn add(
        &self,
        table_id: usize,
        partition: usize,
        delta: &[f32],
        weight: f32,
    ) -> Result<()> {
        let tables = self.tables.read();
        let table = tables
            .get(&table_id)
            .ok_or(TableErr::UnknownTable { table_id })?;
        let row = table
            .rows
            .get(partition)
            .ok_or(TableErr::PartitionOutOfBounds {
                partition,
                partitions: table.rows.len(),
            })?;

        task::block_in_place(|| row.add(delta, weight))
    }

    async fn batch_load(
        &self,
        table_id: usize,
        out: &mut [f32],
        offsets: &[usize],
        sizes: &[usize],
    ) -> Result<()> {
        let tables = self.tables.read();
        let table = tables
            .get(&table_id)
            .ok_or(TableErr::UnknownTable { table_id })?;

        if offsets.len() != table.rows.len() || sizes.len() != table.rows.len() {
            return Err(TableErr::SizeMismatch {
                what: "partition map",
                got: offsets.len().min(sizes.len()),
                expected: table.rows.len(),
            });
        }

        let parts = split_at_offsets(out, offsets, sizes)?;
        task::block_in_place(|| {
            table
                .rows
                .par_iter()
                .zip(parts)
                .try_for_each(|(row, part)| row.load_into(part))
        })
    }

    async fn barrier(&self) -> Result<()> {
        self.barrier.wait().await;
        Ok(())
    }
}

/// Splits `out` into one mutable slice per partition.
///
/// Offsets must be ascending and the described ranges must fit `out`.
fn split_at_offsets<'b>(
    mut out: &'b mut [f32],
    offsets: &[usize],
    sizes: &[usize],
) -> Result<Vec<&'b mut [f32]>> {
    let mut parts = Vec::with_capacity(offsets.len());
    let mut pos = 0;

    for (&offset, &size) in offsets.iter().zip(sizes) {
        let gap = offset.checked_sub(pos).ok_or(TableErr::SizeMismatch {
            what: "offsets",
            got: offset,
            expected: pos,
        })?;
        if gap + size > out.len() {
            return Err(TableErr::SizeMismatch {
                what: "out",
                got: offset + size,
                expected: pos + out.len(),
            });
        }

        let (_, tail) = out.split_at_mut(gap);
        let (part, rest) = tail.split_at_mut(size);
        parts.push(part);
        out = rest;
        pos = offset + size;
    }

    Ok(parts)
}
