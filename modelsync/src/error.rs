use std::{error::Error, fmt};

use paramtable::TableErr;

/// The synchronization engine's result type.
pub type Result<T> = std::result::Result<T, SyncErr>;

/// Model synchronization failures.
#[derive(Debug)]
pub enum SyncErr {
    Config {
        reason: &'static str,
    },
    Table(TableErr),
    TransferTaskGone,
    Unimplemented {
        what: &'static str,
    },
}

impl fmt::Display for SyncErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncErr::Config { reason } => write!(f, "invalid configuration: {reason}"),
            SyncErr::Table(e) => write!(f, "parameter table failure: {e}"),
            SyncErr::TransferTaskGone => write!(f, "background transfer task is gone"),
            SyncErr::Unimplemented { what } => write!(f, "{what} is not implemented"),
        }
    }
}

impl Error for SyncErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SyncErr::Table(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TableErr> for SyncErr {
    fn from(value: TableErr) -> Self {
        Self::Table(value)
    }
}
