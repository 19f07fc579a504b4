//! The node registry itself (§4.C): `addDataNode`/`addMetaNode`
//! idempotent-by-address registration chaining topology (B), the id
//! allocator (A) and the FSM gateway (G), plus O(1) lookups and the
//! live-node rate used by the reconciler's stat loop.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use cm_fsm::gateway::FsmGateway;
use cm_topology::Topology;
use cm_util::error::{Error, OkOrNotFound};
use cm_util::ids::{Address, NodeId, NodeSetId};

use crate::node::{DataNode, MetaNode};

pub struct NodeRegistry {
	topology: Arc<Topology>,
	gateway: Arc<FsmGateway>,
	node_set_capacity: usize,
	data_nodes: RwLock<HashMap<Address, DataNode>>,
	meta_nodes: RwLock<HashMap<Address, MetaNode>>,
	next_node_set_id: RwLock<u64>,
}

impl NodeRegistry {
	pub fn new(topology: Arc<Topology>, gateway: Arc<FsmGateway>, node_set_capacity: usize) -> Self {
		Self {
			topology,
			gateway,
			node_set_capacity,
			data_nodes: RwLock::new(HashMap::new()),
			meta_nodes: RwLock::new(HashMap::new()),
			next_node_set_id: RwLock::new(0),
		}
	}

	/// Finds an available node-set, or creates and persists a new one.
	/// Node-set ids are carved out of the same monotonic namespace as
	/// node ids via a private counter here (node-sets themselves are not
	/// allocated through the id allocator in the design; only nodes and
	/// partitions are), kept strictly increasing for determinism.
	async fn find_or_create_node_set(&self, for_data: bool) -> Result<NodeSetId, Error> {
		let existing = if for_data {
			self.topology.get_avail_node_set_for_data_node()
		} else {
			self.topology.get_avail_node_set_for_meta_node()
		};
		if let Some(id) = existing {
			return Ok(id);
		}

		let id = {
			let mut counter = self.next_node_set_id.write().unwrap();
			*counter += 1;
			NodeSetId(*counter)
		};
		self.gateway
			.sync_add_node_set(&id.to_string(), self.node_set_capacity.to_string().into_bytes())
			.await?;
		self.topology.put_node_set(id, self.node_set_capacity);
		Ok(id)
	}

	/// Idempotent by address: if `addr` is already registered, returns
	/// its existing id without touching the log.
	pub async fn add_data_node(&self, addr: &Address, rack: &str, id_allocator: &cm_topology::IdAllocator) -> Result<NodeId, Error> {
		if let Some(existing) = self.data_nodes.read().unwrap().get(addr) {
			return Ok(existing.id);
		}

		let node_set_id = self.find_or_create_node_set(true).await?;
		let id = NodeId(id_allocator.allocate_common().await?);
		let node = DataNode::new(id, addr.clone(), node_set_id, rack.to_string());

		let persisted = serde_json::to_vec(&node)?;
		if let Err(e) = self.gateway.sync_add_data_node(addr, persisted).await {
			warn!("rolling back data node registration for {}: {}", addr, e);
			return Err(e);
		}

		if let Err(e) = self.topology.add_data_node(node_set_id, rack, addr) {
			warn!("topology admission failed for data node {}: {}", addr, e);
			return Err(e);
		}

		// Insert last: a reader never observes a half-registered node.
		self.data_nodes.write().unwrap().insert(addr.clone(), node);
		Ok(id)
	}

	pub async fn add_meta_node(&self, addr: &Address, rack: &str, id_allocator: &cm_topology::IdAllocator) -> Result<NodeId, Error> {
		if let Some(existing) = self.meta_nodes.read().unwrap().get(addr) {
			return Ok(existing.id);
		}

		let node_set_id = self.find_or_create_node_set(false).await?;
		let id = NodeId(id_allocator.allocate_common().await?);
		let node = MetaNode::new(id, addr.clone(), node_set_id, rack.to_string());

		let persisted = serde_json::to_vec(&node)?;
		if let Err(e) = self.gateway.sync_add_meta_node(addr, persisted).await {
			warn!("rolling back meta node registration for {}: {}", addr, e);
			return Err(e);
		}

		if let Err(e) = self.topology.add_meta_node(node_set_id, rack, addr) {
			warn!("topology admission failed for meta node {}: {}", addr, e);
			return Err(e);
		}

		self.meta_nodes.write().unwrap().insert(addr.clone(), node);
		Ok(id)
	}

	pub fn data_node(&self, addr: &Address) -> Result<DataNode, Error> {
		self.data_nodes.read().unwrap().get(addr).cloned().ok_or_not_found(format!("data node {}", addr))
	}

	pub fn meta_node(&self, addr: &Address) -> Result<MetaNode, Error> {
		self.meta_nodes.read().unwrap().get(addr).cloned().ok_or_not_found(format!("meta node {}", addr))
	}

	pub async fn delete_data_node(&self, addr: &Address) -> Result<(), Error> {
		self.gateway.sync_delete_data_node(addr).await?;
		self.topology.delete_data_node(addr).ok();
		self.data_nodes.write().unwrap().remove(addr);
		Ok(())
	}

	pub async fn delete_meta_node(&self, addr: &Address) -> Result<(), Error> {
		self.gateway.sync_delete_meta_node(addr).await?;
		self.topology.delete_meta_node(addr).ok();
		self.meta_nodes.write().unwrap().remove(addr);
		Ok(())
	}

	/// Ratio of live to registered nodes; 0 when no nodes are registered.
	pub fn live_data_nodes_rate(&self, now_msec: u64, heartbeat_interval_msec: u64) -> f64 {
		let nodes = self.data_nodes.read().unwrap();
		if nodes.is_empty() {
			return 0.0;
		}
		let live = nodes.values().filter(|n| n.is_live(now_msec, heartbeat_interval_msec)).count();
		live as f64 / nodes.len() as f64
	}

	pub fn live_meta_nodes_rate(&self, now_msec: u64, heartbeat_interval_msec: u64) -> f64 {
		let nodes = self.meta_nodes.read().unwrap();
		if nodes.is_empty() {
			return 0.0;
		}
		let live = nodes.values().filter(|n| n.is_live(now_msec, heartbeat_interval_msec)).count();
		live as f64 / nodes.len() as f64
	}

	pub fn all_data_nodes(&self) -> Vec<DataNode> {
		self.data_nodes.read().unwrap().values().cloned().collect()
	}

	pub fn all_meta_nodes(&self) -> Vec<MetaNode> {
		self.meta_nodes.read().unwrap().values().cloned().collect()
	}

	/// Records a successful heartbeat's capacity figures and refreshes
	/// the node's liveness clock; called by the heartbeat reconciler loop.
	pub fn report_data_node_usage(&self, addr: &Address, used: u64, total: u64, now_msec: u64) {
		if let Some(node) = self.data_nodes.write().unwrap().get_mut(addr) {
			node.used = used;
			node.total = total;
			node.last_report_msec = now_msec;
		}
	}

	pub fn touch_meta_node(&self, addr: &Address, now_msec: u64) {
		if let Some(node) = self.meta_nodes.write().unwrap().get_mut(addr) {
			node.last_report_msec = now_msec;
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use cm_fsm::consensus::InMemoryConsensus;
	use cm_fsm::store::InMemoryStore;
	use cm_topology::IdAllocator;

	fn registry() -> (NodeRegistry, IdAllocator) {
		let store = Arc::new(InMemoryStore::new());
		let consensus = InMemoryConsensus::new("n1", store.clone());
		let gateway = Arc::new(FsmGateway::new(consensus, store));
		let topology = Arc::new(Topology::new());
		(NodeRegistry::new(topology, gateway.clone(), 18), IdAllocator::new(gateway))
	}

	#[tokio::test]
	async fn add_data_node_is_idempotent_by_address() {
		let (registry, alloc) = registry();
		let addr = "10.0.0.1:6000".to_string();
		let id1 = registry.add_data_node(&addr, "r1", &alloc).await.unwrap();
		let id2 = registry.add_data_node(&addr, "r1", &alloc).await.unwrap();
		assert_eq!(id1, id2);
		assert_eq!(registry.all_data_nodes().len(), 1);
	}

	#[tokio::test]
	async fn unknown_node_lookup_is_not_found() {
		let (registry, _alloc) = registry();
		let err = registry.data_node(&"nope:1".to_string()).unwrap_err();
		assert!(matches!(err, Error::NotFound(_)));
	}

	#[tokio::test]
	async fn live_rate_is_zero_with_no_nodes() {
		let (registry, _alloc) = registry();
		assert_eq!(registry.live_data_nodes_rate(0, 10), 0.0);
	}

	#[tokio::test]
	async fn live_rate_is_one_when_all_fresh() {
		let (registry, alloc) = registry();
		registry.add_data_node(&"a:1".to_string(), "r1", &alloc).await.unwrap();
		registry.add_data_node(&"b:1".to_string(), "r1", &alloc).await.unwrap();
		let now = cm_util::time::now_msec();
		assert_eq!(registry.live_data_nodes_rate(now, 10_000), 1.0);
	}

	#[tokio::test]
	async fn node_set_member_counts_track_registered_nodes() {
		let (registry, alloc) = registry();
		registry.add_data_node(&"a:1".to_string(), "r1", &alloc).await.unwrap();
		registry.add_meta_node(&"b:1".to_string(), "r1", &alloc).await.unwrap();
		// Both land in the single auto-created node-set, which now has
		// two members out of an 18-node capacity.
		assert_eq!(registry.all_data_nodes().len() + registry.all_meta_nodes().len(), 2);
	}
}

#[cfg(test)]
mod proptests {
	use super::*;
	use cm_fsm::consensus::InMemoryConsensus;
	use cm_fsm::store::InMemoryStore;
	use cm_topology::IdAllocator;
	use proptest::prelude::*;

	proptest! {
		/// `liveDataNodesRate` stays in [0, 1] no matter how many nodes are
		/// registered or how their last-report times are spread out (§8, property 5).
		#[test]
		fn live_rate_always_in_unit_interval(
			node_count in 0usize..12,
			now in 0u64..1_000_000,
			heartbeat_interval in 1u64..10_000,
		) {
			let rt = tokio::runtime::Runtime::new().unwrap();
			rt.block_on(async {
				let store = Arc::new(InMemoryStore::new());
				let consensus = InMemoryConsensus::new("n1", store.clone());
				let gateway = Arc::new(FsmGateway::new(consensus, store));
				let topology = Arc::new(Topology::new());
				let registry = NodeRegistry::new(topology, gateway.clone(), 18);
				let alloc = IdAllocator::new(gateway);

				for i in 0..node_count {
					registry.add_data_node(&format!("n{}:1", i), "r1", &alloc).await.unwrap();
				}

				let rate = registry.live_data_nodes_rate(now, heartbeat_interval);
				prop_assert!((0.0..=1.0).contains(&rate));
				if node_count == 0 {
					prop_assert_eq!(rate, 0.0);
				}
				Ok(())
			})?;
		}
	}
}
