pub mod backend;
pub mod bridge;
pub mod coefficient;
pub mod config;
pub mod error;
pub mod layout;
pub mod staging;
pub mod sync;
mod transfer;

pub use backend::{ComputeBackend, HostBackend};
pub use bridge::{ParamTensor, VecTensor};
pub use coefficient::RampPolicy;
pub use config::{SyncConfig, SyncStrategy};
pub use error::{Result, SyncErr};
pub use layout::{ParamLayout, PartitionMap};
pub use staging::StagingPool;
pub use sync::ModelSync;
