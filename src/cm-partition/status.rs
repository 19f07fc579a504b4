//! Replica-derived status shared by data and meta partitions (§4.D).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionStatus {
	ReadWrite,
	ReadOnly,
	Unavailable,
}
