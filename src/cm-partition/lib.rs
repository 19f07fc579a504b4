//! Partition and volume model (§4.D/§4.E). Mutations on a partition
//! are serialized by that partition's own lock; mutations on a
//! volume's partition collections are serialized by the volume's
//! lock. No lock here is ever held across network I/O or a proposal
//! await — callers copy out what they need, act, then merge results
//! back in under the lock.
#[macro_use]
extern crate tracing;

pub mod data_partition;
pub mod meta_partition;
pub mod replica;
pub mod status;
pub mod volume;

pub use data_partition::DataPartition;
pub use meta_partition::MetaPartition;
pub use replica::Replica;
pub use status::PartitionStatus;
pub use volume::{Volume, VolumeStatus};
