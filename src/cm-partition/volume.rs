//! Volumes (§4.E): a named container for one meta-partition range set
//! and one data-partition set. Mutations on the partition collections
//! are serialized by the volume's own locks; individual partitions
//! still carry their own locks underneath (§5 lock ordering: per-volume
//! before per-partition).

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use cm_util::error::Error;
use cm_util::ids::{PartitionId, VolumeId};

use crate::data_partition::DataPartition;
use crate::meta_partition::MetaPartition;
use crate::status::PartitionStatus;

pub const DEFAULT_INIT_DATA_PARTITION_CNT: usize = 10;
const MAX_INIT_RETRIES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeStatus {
	Normal,
	MarkDelete,
}

/// The three inode-range boundaries used to seed a new volume's meta
/// partitions: `[0, E0], (E0, E1], (E1, +inf)`. Not specified further
/// upstream; chosen generously (16M / 64K-squared inodes) so ranges
/// don't need splitting for a long time under normal use.
const E0: u64 = 1 << 24;
const E1: u64 = 1 << 40;

pub fn meta_partition_ranges() -> [(u64, Option<u64>); 3] {
	[(0, Some(E0)), (E0 + 1, Some(E1)), (E1 + 1, None)]
}

pub struct Volume {
	pub id: VolumeId,
	pub name: String,
	pub dp_replica_num: usize,
	pub mp_replica_num: usize,
	pub enable_random_write: bool,
	pub dp_size_bytes: u64,
	capacity_bytes: AtomicU64,
	status: RwLock<VolumeStatus>,
	data_partitions: RwLock<BTreeMap<PartitionId, Arc<DataPartition>>>,
	meta_partitions: RwLock<Vec<Arc<MetaPartition>>>,
	rw_data_partition_ids: RwLock<Vec<PartitionId>>,
	response_cache: RwLock<Vec<u8>>,
}

impl Volume {
	pub fn new(
		id: VolumeId,
		name: String,
		dp_replica_num: usize,
		mp_replica_num: usize,
		enable_random_write: bool,
		dp_size_bytes: u64,
		capacity_bytes: u64,
	) -> Self {
		Self {
			id,
			name,
			dp_replica_num,
			mp_replica_num,
			enable_random_write,
			dp_size_bytes,
			capacity_bytes: AtomicU64::new(capacity_bytes),
			status: RwLock::new(VolumeStatus::Normal),
			data_partitions: RwLock::new(BTreeMap::new()),
			meta_partitions: RwLock::new(Vec::new()),
			rw_data_partition_ids: RwLock::new(Vec::new()),
			response_cache: RwLock::new(Vec::new()),
		}
	}

	pub fn status(&self) -> VolumeStatus {
		*self.status.read().unwrap()
	}

	pub fn mark_delete(&self) {
		*self.status.write().unwrap() = VolumeStatus::MarkDelete;
	}

	pub fn capacity_bytes(&self) -> u64 {
		self.capacity_bytes.load(Ordering::SeqCst)
	}

	/// Raises the volume's capacity; shrinking is rejected, matching
	/// `updateVol(name, newCapacity)` with `newCapacity < currentCapacity`.
	pub fn update_capacity(&self, new_capacity: u64) -> Result<(), Error> {
		let current = self.capacity_bytes();
		if new_capacity < current {
			return Err(Error::InvalidArgument(format!(
				"volume {} capacity cannot shrink from {} to {}",
				self.name, current, new_capacity
			)));
		}
		self.capacity_bytes.store(new_capacity, Ordering::SeqCst);
		Ok(())
	}

	pub fn data_partition(&self, id: PartitionId) -> Option<Arc<DataPartition>> {
		self.data_partitions.read().unwrap().get(&id).cloned()
	}

	pub fn data_partitions(&self) -> Vec<Arc<DataPartition>> {
		self.data_partitions.read().unwrap().values().cloned().collect()
	}

	pub fn meta_partitions(&self) -> Vec<Arc<MetaPartition>> {
		self.meta_partitions.read().unwrap().clone()
	}

	/// The partition whose range is still open-ended (the tail of the
	/// inode-id space), i.e. the one `updateInodeIDRange` would split.
	pub fn open_ended_meta_partition(&self) -> Option<Arc<MetaPartition>> {
		self.meta_partitions
			.read()
			.unwrap()
			.iter()
			.rev()
			.find(|mp| mp.range().1.is_none())
			.cloned()
	}

	/// Appends a newly created sibling meta partition, used once a split
	/// via `updateInodeIDRange` has closed the previous tail's end bound.
	pub fn push_meta_partition(&self, mp: Arc<MetaPartition>) {
		self.meta_partitions.write().unwrap().push(mp);
	}

	pub fn insert_data_partition(&self, dp: Arc<DataPartition>) {
		self.data_partitions.write().unwrap().insert(dp.id, dp);
	}

	pub fn remove_data_partition(&self, id: PartitionId) {
		self.data_partitions.write().unwrap().remove(&id);
	}

	/// Recomputes every data partition's status from replica telemetry,
	/// refreshes the read-write subset and the client-facing response
	/// cache, and returns the now-read-writable partition ids.
	pub fn check_data_partitions(&self, now_msec: u64, heartbeat_interval_msec: u64) -> Vec<PartitionId> {
		let rw: Vec<PartitionId> = self
			.data_partitions
			.read()
			.unwrap()
			.values()
			.filter(|dp| dp.check_status(now_msec, heartbeat_interval_msec) == PartitionStatus::ReadWrite)
			.map(|dp| dp.id)
			.collect();

		*self.rw_data_partition_ids.write().unwrap() = rw.clone();
		self.refresh_response_cache();
		rw
	}

	pub fn rw_data_partition_ids(&self) -> Vec<PartitionId> {
		self.rw_data_partition_ids.read().unwrap().clone()
	}

	pub fn response_cache(&self) -> Vec<u8> {
		self.response_cache.read().unwrap().clone()
	}

	fn refresh_response_cache(&self) {
		#[derive(Serialize)]
		struct Summary {
			name: String,
			rw_data_partition_count: usize,
			total_data_partition_count: usize,
		}
		let summary = Summary {
			name: self.name.clone(),
			rw_data_partition_count: self.rw_data_partition_ids.read().unwrap().len(),
			total_data_partition_count: self.data_partitions.read().unwrap().len(),
		};
		if let Ok(bytes) = serde_json::to_vec(&summary) {
			*self.response_cache.write().unwrap() = bytes;
		}
	}

	/// Calls `create_one` until at least `target_count` data partitions
	/// are read-writable, retrying up to [`MAX_INIT_RETRIES`] rounds.
	/// `create_one` is supplied by the orchestrator, which alone knows
	/// how to pick hosts and dispatch the remote create task.
	pub async fn init_data_partitions<F, Fut>(&self, target_count: usize, mut create_one: F) -> Result<(), Error>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<Arc<DataPartition>, Error>>,
	{
		for attempt in 1..=MAX_INIT_RETRIES {
			let have = self.data_partitions.read().unwrap().len();
			if have >= target_count {
				break;
			}
			for _ in have..target_count {
				match create_one().await {
					Ok(dp) => self.insert_data_partition(dp),
					Err(e) => warn!("attempt {} to init data partitions for volume {} failed: {}", attempt, self.name, e),
				}
			}
		}

		let rw_count = self
			.data_partitions
			.read()
			.unwrap()
			.values()
			.filter(|dp| dp.status() == PartitionStatus::ReadWrite)
			.count();
		if rw_count < target_count {
			return Err(Error::NoResource(format!(
				"volume {} only has {} read-write data partitions after {} attempts",
				self.name, rw_count, MAX_INIT_RETRIES
			)));
		}
		Ok(())
	}

	/// Creates the volume's 3 meta partitions via `create_one`, one call
	/// per inode range. An empty result marks the volume deleted.
	pub async fn init_meta_partitions<F, Fut>(&self, mut create_one: F) -> Result<(), Error>
	where
		F: FnMut(u64, Option<u64>) -> Fut,
		Fut: Future<Output = Result<Arc<MetaPartition>, Error>>,
	{
		let mut created = Vec::new();
		for (start, end) in meta_partition_ranges() {
			match create_one(start, end).await {
				Ok(mp) => created.push(mp),
				Err(e) => warn!("failed to create meta partition [{}, {:?}) for volume {}: {}", start, end, self.name, e),
			}
		}

		if created.is_empty() {
			self.mark_delete();
			return Err(Error::NoResource(format!("volume {} got no meta partitions", self.name)));
		}

		*self.meta_partitions.write().unwrap() = created;
		Ok(())
	}
}
