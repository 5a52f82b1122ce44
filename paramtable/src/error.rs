use std::{error::Error, fmt};

/// The parameter-table module's result type.
pub type Result<T> = std::result::Result<T, TableErr>;

/// Parameter-table boundary failures.
///
/// Every variant is fatal to the round that triggered it; this layer
/// performs no retries.
#[derive(Debug)]
pub enum TableErr {
    NotConfigured {
        table_id: usize,
    },
    UnknownTable {
        table_id: usize,
    },
    Reconfigured {
        table_id: usize,
        got: usize,
        expected: usize,
    },
    PartitionOutOfBounds {
        partition: usize,
        partitions: usize,
    },
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
}

impl fmt::Display for TableErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableErr::NotConfigured { table_id } => {
                write!(f, "table {table_id} was used before being configured")
            }
            TableErr::UnknownTable { table_id } => write!(f, "unknown table {table_id}"),
            TableErr::Reconfigured {
                table_id,
                got,
                expected,
            } => write!(
                f,
                "table {table_id} reconfigured with {got} partitions, expected {expected}"
            ),
            TableErr::PartitionOutOfBounds {
                partition,
                partitions,
            } => write!(
                f,
                "partition {partition} out of bounds for a table of {partitions} partitions"
            ),
            TableErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "size mismatch on {what}: got {got}, expected at most {expected}"
            ),
        }
    }
}

impl Error for TableErr {}
