//! Monotonic id allocator (§4.A). Three independent counters — common
//! ids (node-set/node ids), data partition ids, meta partition ids —
//! each persisted as a big-endian `u64` under its own `id/*` prefix.
//!
//! Allocation proposes the tentative next value through the FSM
//! gateway and only commits it locally once the proposal succeeds;
//! on `ProposalFailed` the in-memory counter is left untouched so a
//! retry reuses the same value instead of leaking an id.

use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex as AsyncMutex;

use cm_fsm::gateway::FsmGateway;
use cm_fsm::record::{Record, RecordKind};
use cm_fsm::store::Store;
use cm_util::error::Error;

struct Counter {
	value: StdMutex<u64>,
	// Held across the propose await to serialize concurrent allocators;
	// the teacher reserves tokio::sync::Mutex for exactly this case.
	gate: AsyncMutex<()>,
}

impl Counter {
	fn new() -> Self {
		Self {
			value: StdMutex::new(0),
			gate: AsyncMutex::new(()),
		}
	}

	fn get(&self) -> u64 {
		*self.value.lock().unwrap()
	}

	fn set_if_greater(&self, v: u64) {
		let mut guard = self.value.lock().unwrap();
		if v > *guard {
			*guard = v;
		}
	}
}

fn decode_be_u64(bytes: &[u8]) -> u64 {
	let mut buf = [0u8; 8];
	let n = bytes.len().min(8);
	buf[8 - n..].copy_from_slice(&bytes[bytes.len() - n..]);
	u64::from_be_bytes(buf)
}

pub struct IdAllocator {
	gateway: Arc<FsmGateway>,
	common: Counter,
	data_partition: Counter,
	meta_partition: Counter,
}

impl IdAllocator {
	pub fn new(gateway: Arc<FsmGateway>) -> Self {
		Self {
			gateway,
			common: Counter::new(),
			data_partition: Counter::new(),
			meta_partition: Counter::new(),
		}
	}

	/// Restores counters from the store on startup, before this node is
	/// necessarily leader. Only raises the in-memory value, never lowers it.
	pub fn recover(&self, store: &dyn Store) -> Result<(), Error> {
		if let Some(bytes) = store.get("id/common/counter")? {
			self.common.set_if_greater(decode_be_u64(&bytes));
		}
		if let Some(bytes) = store.get("id/dp/counter")? {
			self.data_partition.set_if_greater(decode_be_u64(&bytes));
		}
		if let Some(bytes) = store.get("id/mp/counter")? {
			self.meta_partition.set_if_greater(decode_be_u64(&bytes));
		}
		Ok(())
	}

	/// Reconciles a counter with a record applied by the FSM, on any
	/// replica, regardless of who proposed it (§4.G apply semantics).
	pub fn apply(&self, record: &Record) {
		let counter = match record.kind {
			RecordKind::AllocCommonId => &self.common,
			RecordKind::AllocDataPartitionId => &self.data_partition,
			RecordKind::AllocMetaPartitionId => &self.meta_partition,
			_ => return,
		};
		counter.set_if_greater(decode_be_u64(&record.value));
	}

	async fn allocate_via<F, Fut>(&self, counter: &Counter, propose: F) -> Result<u64, Error>
	where
		F: FnOnce(u64) -> Fut,
		Fut: Future<Output = Result<(), Error>>,
	{
		let _gate = counter.gate.lock().await;
		let next = counter.get() + 1;
		propose(next).await?;
		counter.set_if_greater(next);
		Ok(next)
	}

	pub async fn allocate_common(&self) -> Result<u64, Error> {
		let gateway = self.gateway.clone();
		self.allocate_via(&self.common, move |next| async move { gateway.sync_alloc_common_id(next).await })
			.await
	}

	pub async fn allocate_data_partition_id(&self) -> Result<u64, Error> {
		let gateway = self.gateway.clone();
		self.allocate_via(&self.data_partition, move |next| async move {
			gateway.sync_alloc_data_partition_id(next).await
		})
		.await
	}

	pub async fn allocate_meta_partition_id(&self) -> Result<u64, Error> {
		let gateway = self.gateway.clone();
		self.allocate_via(&self.meta_partition, move |next| async move {
			gateway.sync_alloc_meta_partition_id(next).await
		})
		.await
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use cm_fsm::consensus::InMemoryConsensus;
	use cm_fsm::store::InMemoryStore;

	fn allocator() -> (IdAllocator, Arc<InMemoryStore>) {
		let store = Arc::new(InMemoryStore::new());
		let consensus = InMemoryConsensus::new("n1", store.clone());
		let gateway = Arc::new(FsmGateway::new(consensus, store.clone()));
		(IdAllocator::new(gateway), store)
	}

	#[tokio::test]
	async fn allocate_common_increments_and_persists() {
		let (alloc, store) = allocator();
		assert_eq!(alloc.allocate_common().await.unwrap(), 1);
		assert_eq!(alloc.allocate_common().await.unwrap(), 2);
		assert_eq!(store.get("id/common/counter").unwrap().unwrap(), 2u64.to_be_bytes().to_vec());
	}

	#[tokio::test]
	async fn recover_restores_highest_persisted_value() {
		let (alloc, store) = allocator();
		store.put("id/dp/counter", &42u64.to_be_bytes()).unwrap();
		alloc.recover(store.as_ref()).unwrap();
		assert_eq!(alloc.allocate_data_partition_id().await.unwrap(), 43);
	}

	#[test]
	fn apply_never_lowers_the_counter() {
		let (alloc, _store) = allocator();
		alloc.apply(&Record::new(RecordKind::AllocMetaPartitionId, "counter", 10u64.to_be_bytes().to_vec()));
		alloc.apply(&Record::new(RecordKind::AllocMetaPartitionId, "counter", 3u64.to_be_bytes().to_vec()));
		assert_eq!(alloc.meta_partition.get(), 10);
	}
}
