//! Node-set / rack structure and placement queries (§4.B). This module
//! owns only the *structural* side of placement: which node-set, and
//! how many replicas should come from which rack. It deliberately does
//! not know about node capacity or liveness — that lives in the
//! registry crate — so the actual per-rack node pick is left to
//! [`crate::carry::carry_select`], called by the orchestrator once it
//! has zipped a rack's addresses with registry capacity figures.

use std::collections::HashMap;
use std::sync::RwLock;

use cm_util::error::Error;
use cm_util::ids::{Address, NodeSetId};

/// A rack within a node-set: a name and the addresses of the nodes
/// (data or meta) currently placed in it. `data_count`/`meta_count`
/// track how many of `addrs` are data nodes vs. meta nodes — a rack
/// can hold both, and data-partition rack selection must only
/// consider racks that actually have registered data nodes (§4.B).
#[derive(Debug, Clone)]
pub struct Rack {
	pub name: String,
	pub addrs: Vec<Address>,
	pub data_count: usize,
	pub meta_count: usize,
}

struct NodeSet {
	id: NodeSetId,
	capacity: usize,
	data_node_count: usize,
	meta_node_count: usize,
	racks: Vec<Rack>,
}

impl NodeSet {
	fn member_count(&self) -> usize {
		self.data_node_count + self.meta_node_count
	}

	fn rack_mut(&mut self, name: &str) -> &mut Rack {
		if let Some(i) = self.racks.iter().position(|r| r.name == name) {
			&mut self.racks[i]
		} else {
			self.racks.push(Rack {
				name: name.to_string(),
				addrs: Vec::new(),
				data_count: 0,
				meta_count: 0,
			});
			self.racks.last_mut().unwrap()
		}
	}
}

/// Per-rack share of a data-partition placement request, returned by
/// [`Topology::alloc_node_set_for_data_node`]. The orchestrator still
/// needs to carry-select `count` specific addresses out of each named
/// rack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RackAllocation {
	pub rack: String,
	pub count: usize,
}

/// Where a data partition's hosts should be drawn from.
#[derive(Debug, Clone)]
pub struct DataPlacement {
	pub node_set_id: NodeSetId,
	pub racks: Vec<RackAllocation>,
}

pub struct Topology {
	// Node-sets are kept in creation order; "first node-set that fits"
	// selection below relies on that order for determinism across replays.
	node_sets: RwLock<Vec<NodeSet>>,
	// addr -> (node-set, rack name), for O(1) getRack/delete.
	node_rack: RwLock<HashMap<Address, (NodeSetId, String)>>,
}

impl Topology {
	pub fn new() -> Self {
		Self {
			node_sets: RwLock::new(Vec::new()),
			node_rack: RwLock::new(HashMap::new()),
		}
	}

	/// Registers a new, empty node-set with the given capacity. Capacity
	/// bounds data nodes and meta nodes together, mirroring the
	/// `member-count < capacity` invariant.
	pub fn put_node_set(&self, id: NodeSetId, capacity: usize) {
		self.node_sets.write().unwrap().push(NodeSet {
			id,
			capacity,
			data_node_count: 0,
			meta_node_count: 0,
			racks: Vec::new(),
		});
	}

	fn first_avail(&self) -> Option<NodeSetId> {
		self.node_sets
			.read()
			.unwrap()
			.iter()
			.find(|ns| ns.member_count() < ns.capacity)
			.map(|ns| ns.id)
	}

	pub fn get_avail_node_set_for_data_node(&self) -> Option<NodeSetId> {
		self.first_avail()
	}

	pub fn get_avail_node_set_for_meta_node(&self) -> Option<NodeSetId> {
		self.first_avail()
	}

	/// Addresses belonging to one rack of one node-set, for the
	/// orchestrator to zip with registry capacity before carry-selecting.
	pub fn rack_addrs(&self, node_set_id: NodeSetId, rack: &str) -> Vec<Address> {
		self.node_sets
			.read()
			.unwrap()
			.iter()
			.find(|ns| ns.id == node_set_id)
			.and_then(|ns| ns.racks.iter().find(|r| r.name == rack))
			.map(|r| r.addrs.clone())
			.unwrap_or_default()
	}

	/// All racks of one node-set, used by meta-partition placement
	/// (which flattens across racks) and by decommission fallback
	/// (which widens the search past the offline node's own rack).
	pub fn racks_in_node_set(&self, node_set_id: NodeSetId) -> Vec<Rack> {
		self.node_sets
			.read()
			.unwrap()
			.iter()
			.find(|ns| ns.id == node_set_id)
			.map(|ns| ns.racks.clone())
			.unwrap_or_default()
	}

	/// Every node address currently known to the topology, across all
	/// node-sets and racks — the decommission fallback's whole-cluster search.
	pub fn all_addrs(&self) -> Vec<Address> {
		self.node_rack.read().unwrap().keys().cloned().collect()
	}

	pub fn add_data_node(&self, node_set_id: NodeSetId, rack: &str, addr: &Address) -> Result<(), Error> {
		let mut sets = self.node_sets.write().unwrap();
		let ns = sets
			.iter_mut()
			.find(|ns| ns.id == node_set_id)
			.ok_or_else(|| Error::NotFound(format!("node-set {}", node_set_id)))?;
		if ns.member_count() >= ns.capacity {
			return Err(Error::NoResource(format!("node-set {} is full", node_set_id)));
		}
		let r = ns.rack_mut(rack);
		r.addrs.push(addr.clone());
		r.data_count += 1;
		ns.data_node_count += 1;
		drop(sets);
		self.node_rack.write().unwrap().insert(addr.clone(), (node_set_id, rack.to_string()));
		Ok(())
	}

	pub fn add_meta_node(&self, node_set_id: NodeSetId, rack: &str, addr: &Address) -> Result<(), Error> {
		let mut sets = self.node_sets.write().unwrap();
		let ns = sets
			.iter_mut()
			.find(|ns| ns.id == node_set_id)
			.ok_or_else(|| Error::NotFound(format!("node-set {}", node_set_id)))?;
		if ns.member_count() >= ns.capacity {
			return Err(Error::NoResource(format!("node-set {} is full", node_set_id)));
		}
		let r = ns.rack_mut(rack);
		r.addrs.push(addr.clone());
		r.meta_count += 1;
		ns.meta_node_count += 1;
		drop(sets);
		self.node_rack.write().unwrap().insert(addr.clone(), (node_set_id, rack.to_string()));
		Ok(())
	}

	/// The node-set and rack a registered node belongs to.
	pub fn node_set_and_rack(&self, addr: &Address) -> Result<(NodeSetId, String), Error> {
		self.node_rack
			.read()
			.unwrap()
			.get(addr)
			.cloned()
			.ok_or_else(|| Error::NotFound(format!("node {}", addr)))
	}

	pub fn get_rack(&self, addr: &Address) -> Result<String, Error> {
		self.node_rack
			.read()
			.unwrap()
			.get(addr)
			.map(|(_, rack)| rack.clone())
			.ok_or_else(|| Error::NotFound(format!("node {}", addr)))
	}

	pub fn delete_data_node(&self, addr: &Address) -> Result<(), Error> {
		let (node_set_id, rack) = self
			.node_rack
			.write()
			.unwrap()
			.remove(addr)
			.ok_or_else(|| Error::NotFound(format!("node {}", addr)))?;
		let mut sets = self.node_sets.write().unwrap();
		if let Some(ns) = sets.iter_mut().find(|ns| ns.id == node_set_id) {
			if let Some(r) = ns.racks.iter_mut().find(|r| r.name == rack) {
				r.addrs.retain(|a| a != addr);
				r.data_count = r.data_count.saturating_sub(1);
			}
			ns.racks.retain(|r| !r.addrs.is_empty());
			ns.data_node_count = ns.data_node_count.saturating_sub(1);
		}
		Ok(())
	}

	pub fn delete_meta_node(&self, addr: &Address) -> Result<(), Error> {
		let (node_set_id, rack) = self
			.node_rack
			.write()
			.unwrap()
			.remove(addr)
			.ok_or_else(|| Error::NotFound(format!("node {}", addr)))?;
		let mut sets = self.node_sets.write().unwrap();
		if let Some(ns) = sets.iter_mut().find(|ns| ns.id == node_set_id) {
			if let Some(r) = ns.racks.iter_mut().find(|r| r.name == rack) {
				r.addrs.retain(|a| a != addr);
				r.meta_count = r.meta_count.saturating_sub(1);
			}
			ns.racks.retain(|r| !r.addrs.is_empty());
			ns.meta_node_count = ns.meta_node_count.saturating_sub(1);
		}
		Ok(())
	}

	/// Implements the 5-step data-partition rack composition order from
	/// the design (the within-rack node pick is left to the caller).
	pub fn alloc_node_set_for_data_node(&self, replica_num: usize) -> Result<DataPlacement, Error> {
		let sets = self.node_sets.read().unwrap();
		let ns = sets
			.iter()
			.find(|ns| ns.data_node_count >= replica_num)
			.ok_or_else(|| Error::NoResource("no data node to create data partition".to_string()))?;

		// A rack can hold both data and meta nodes; only racks that
		// actually have registered data nodes are eligible for data-
		// partition placement (a node-set's rack list is shared between
		// `add_data_node` and `add_meta_node`).
		let data_racks: Vec<&Rack> = ns.racks.iter().filter(|r| r.data_count > 0).collect();

		let racks = if data_racks.len() <= 1 {
			data_racks
				.first()
				.map(|r| vec![RackAllocation { rack: r.name.clone(), count: replica_num }])
				.unwrap_or_default()
		} else if data_racks.len() >= 2 && replica_num == 3 {
			let master = replica_num / 2 + 1;
			let slave = replica_num - master;
			vec![
				RackAllocation { rack: data_racks[0].name.clone(), count: master },
				RackAllocation { rack: data_racks[1].name.clone(), count: slave },
			]
		} else if data_racks.len() >= replica_num {
			data_racks
				.iter()
				.take(replica_num)
				.map(|r| RackAllocation { rack: r.name.clone(), count: 1 })
				.collect()
		} else {
			return Err(Error::NoResource("no data node to create data partition".to_string()));
		};

		if racks.iter().map(|r| r.count).sum::<usize>() != replica_num {
			return Err(Error::NoResource("no data node to create data partition".to_string()));
		}

		Ok(DataPlacement { node_set_id: ns.id, racks })
	}

	/// Picks a node-set with enough meta nodes; no rack-diversity
	/// requirement, so the caller carry-selects across the whole set.
	pub fn alloc_node_set_for_meta_node(&self, replica_num: usize) -> Result<NodeSetId, Error> {
		self.node_sets
			.read()
			.unwrap()
			.iter()
			.find(|ns| ns.meta_node_count >= replica_num)
			.map(|ns| ns.id)
			.ok_or_else(|| Error::NoResource("no meta node to create meta partition".to_string()))
	}
}

impl Default for Topology {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn filled(topo: &Topology, id: u64, capacity: usize, racks: &[(&str, usize)]) {
		topo.put_node_set(NodeSetId(id), capacity);
		for (rack, count) in racks {
			for i in 0..*count {
				topo.add_data_node(NodeSetId(id), rack, &format!("{}-{}-{}", rack, id, i)).unwrap();
			}
		}
	}

	#[test]
	fn single_rack_takes_all_replicas_from_it() {
		let topo = Topology::new();
		filled(&topo, 1, 18, &[("r1", 3)]);
		let placement = topo.alloc_node_set_for_data_node(3).unwrap();
		assert_eq!(placement.racks, vec![RackAllocation { rack: "r1".into(), count: 3 }]);
	}

	#[test]
	fn two_racks_with_three_replicas_splits_two_one() {
		let topo = Topology::new();
		filled(&topo, 1, 18, &[("r1", 2), ("r2", 2)]);
		let placement = topo.alloc_node_set_for_data_node(3).unwrap();
		assert_eq!(placement.racks.iter().map(|r| r.count).sum::<usize>(), 3);
		assert_eq!(placement.racks[0].count, 2);
		assert_eq!(placement.racks[1].count, 1);
	}

	#[test]
	fn enough_racks_takes_one_replica_each() {
		let topo = Topology::new();
		filled(&topo, 1, 18, &[("r1", 2), ("r2", 2), ("r3", 2), ("r4", 2)]);
		let placement = topo.alloc_node_set_for_data_node(4).unwrap();
		assert_eq!(placement.racks.len(), 4);
		assert!(placement.racks.iter().all(|r| r.count == 1));
	}

	#[test]
	fn meta_only_rack_is_skipped_when_placing_data_partitions() {
		// A rack that only holds meta nodes must not count toward data-
		// partition rack diversity, even when it was registered first.
		let topo = Topology::new();
		topo.put_node_set(NodeSetId(1), 18);
		topo.add_meta_node(NodeSetId(1), "meta-rack", &"m1".to_string()).unwrap();
		topo.add_data_node(NodeSetId(1), "r1", &"d1".to_string()).unwrap();
		topo.add_data_node(NodeSetId(1), "r1", &"d2".to_string()).unwrap();
		topo.add_data_node(NodeSetId(1), "r1", &"d3".to_string()).unwrap();

		let placement = topo.alloc_node_set_for_data_node(3).unwrap();
		assert_eq!(placement.racks, vec![RackAllocation { rack: "r1".into(), count: 3 }]);
	}

	#[test]
	fn insufficient_hosts_is_no_resource() {
		let topo = Topology::new();
		filled(&topo, 1, 18, &[("r1", 1)]);
		let err = topo.alloc_node_set_for_data_node(3).unwrap_err();
		assert!(matches!(err, Error::NoResource(_)));
	}

	#[test]
	fn node_set_counts_match_registered_nodes() {
		let topo = Topology::new();
		topo.put_node_set(NodeSetId(1), 18);
		topo.add_data_node(NodeSetId(1), "r1", &"n1".to_string()).unwrap();
		topo.add_data_node(NodeSetId(1), "r1", &"n2".to_string()).unwrap();
		topo.delete_data_node(&"n1".to_string()).unwrap();
		let placement = topo.alloc_node_set_for_data_node(1).unwrap();
		assert_eq!(placement.racks[0].count, 1);
	}

	#[test]
	fn full_node_set_is_not_available() {
		let topo = Topology::new();
		topo.put_node_set(NodeSetId(1), 1);
		topo.add_data_node(NodeSetId(1), "r1", &"n1".to_string()).unwrap();
		assert_eq!(topo.get_avail_node_set_for_data_node(), None);
		let err = topo.add_data_node(NodeSetId(1), "r1", &"n2".to_string()).unwrap_err();
		assert!(matches!(err, Error::NoResource(_)));
	}
}
