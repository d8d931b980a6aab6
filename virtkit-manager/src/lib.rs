pub mod manager;
pub mod network;
pub mod provision;
pub mod sampler;
pub mod storage;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use manager::{VmManager, VmManagerConfig};
pub use storage::Datastore;
