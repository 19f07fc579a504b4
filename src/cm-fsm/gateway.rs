//! The gateway struct itself: the narrow seam every mutating operation
//! in the higher-level crates goes through (§4.G). It exposes one typed
//! `sync_*` method per record kind, matching the names in the design
//! (`syncAddVol`, `syncAddDataNode`, the id-allocator proposals, ...).

use std::sync::Arc;

use cm_util::error::Error;

use crate::consensus::{ApplyFn, ConsensusHandle};
use crate::record::{Record, RecordKind};
use crate::store::Store;

pub struct FsmGateway {
	consensus: Arc<dyn ConsensusHandle>,
	store: Arc<dyn Store>,
}

impl FsmGateway {
	pub fn new(consensus: Arc<dyn ConsensusHandle>, store: Arc<dyn Store>) -> Self {
		Self { consensus, store }
	}

	pub fn store(&self) -> &Arc<dyn Store> {
		&self.store
	}

	pub fn is_leader(&self) -> bool {
		self.consensus.is_leader()
	}

	pub fn leader_term(&self) -> (String, u64) {
		self.consensus.leader_term()
	}

	pub fn register_apply(&self, f: Box<ApplyFn>) {
		self.consensus.register_apply(f)
	}

	async fn propose(&self, kind: RecordKind, key: impl Into<String>, value: Vec<u8>) -> Result<(), Error> {
		if !self.consensus.is_leader() {
			return Err(Error::NotLeader);
		}
		self.consensus.submit(Record::new(kind, key, value)).await
	}

	// ---- volumes ----
	pub async fn sync_add_vol(&self, name: &str, value: Vec<u8>) -> Result<(), Error> {
		self.propose(RecordKind::AddVol, name, value).await
	}
	pub async fn sync_update_vol(&self, name: &str, value: Vec<u8>) -> Result<(), Error> {
		self.propose(RecordKind::UpdateVol, name, value).await
	}
	pub async fn sync_delete_vol(&self, name: &str) -> Result<(), Error> {
		self.propose(RecordKind::DeleteVol, name, vec![]).await
	}

	// ---- nodes ----
	pub async fn sync_add_meta_node(&self, addr: &str, value: Vec<u8>) -> Result<(), Error> {
		self.propose(RecordKind::AddMetaNode, addr, value).await
	}
	pub async fn sync_delete_meta_node(&self, addr: &str) -> Result<(), Error> {
		self.propose(RecordKind::DeleteMetaNode, addr, vec![]).await
	}
	pub async fn sync_add_data_node(&self, addr: &str, value: Vec<u8>) -> Result<(), Error> {
		self.propose(RecordKind::AddDataNode, addr, value).await
	}
	pub async fn sync_delete_data_node(&self, addr: &str) -> Result<(), Error> {
		self.propose(RecordKind::DeleteDataNode, addr, vec![]).await
	}

	// ---- partitions ----
	pub async fn sync_add_data_partition(&self, key: &str, value: Vec<u8>) -> Result<(), Error> {
		self.propose(RecordKind::AddDataPartition, key, value).await
	}
	pub async fn sync_update_data_partition(&self, key: &str, value: Vec<u8>) -> Result<(), Error> {
		self.propose(RecordKind::UpdateDataPartition, key, value).await
	}
	pub async fn sync_add_meta_partition(&self, key: &str, value: Vec<u8>) -> Result<(), Error> {
		self.propose(RecordKind::AddMetaPartition, key, value).await
	}
	pub async fn sync_update_meta_partition(&self, key: &str, value: Vec<u8>) -> Result<(), Error> {
		self.propose(RecordKind::UpdateMetaPartition, key, value).await
	}

	// ---- node sets ----
	pub async fn sync_add_node_set(&self, key: &str, value: Vec<u8>) -> Result<(), Error> {
		self.propose(RecordKind::AddNodeSet, key, value).await
	}
	pub async fn sync_update_node_set(&self, key: &str, value: Vec<u8>) -> Result<(), Error> {
		self.propose(RecordKind::UpdateNodeSet, key, value).await
	}

	// ---- id allocator ----
	pub async fn sync_alloc_common_id(&self, value: u64) -> Result<(), Error> {
		self.propose(RecordKind::AllocCommonId, "counter", value.to_be_bytes().to_vec())
			.await
	}
	pub async fn sync_alloc_data_partition_id(&self, value: u64) -> Result<(), Error> {
		self.propose(
			RecordKind::AllocDataPartitionId,
			"counter",
			value.to_be_bytes().to_vec(),
		)
		.await
	}
	pub async fn sync_alloc_meta_partition_id(&self, value: u64) -> Result<(), Error> {
		self.propose(
			RecordKind::AllocMetaPartitionId,
			"counter",
			value.to_be_bytes().to_vec(),
		)
		.await
	}
}
