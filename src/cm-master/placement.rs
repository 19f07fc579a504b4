//! Zips topology structure (B) with registry capacity data (C) to
//! produce concrete host addresses, by calling into the decoupled
//! [`cm_topology::carry_select`] primitive. This is exactly the glue
//! the crate split was designed to push up to the orchestrator (see
//! the module doc on `cm_topology::carry`).

use cm_registry::NodeRegistry;
use cm_topology::{carry_select, CarryNode, Topology};
use cm_util::error::Error;
use cm_util::ids::Address;

#[allow(clippy::too_many_arguments)]
fn data_candidates(
	topology: &Topology,
	registry: &NodeRegistry,
	node_set_id: cm_util::ids::NodeSetId,
	rack: &str,
	exclude: &[Address],
	now_msec: u64,
	heartbeat_interval_msec: u64,
) -> Vec<CarryNode> {
	topology
		.rack_addrs(node_set_id, rack)
		.into_iter()
		.filter(|a| !exclude.contains(a))
		.filter_map(|addr| registry.data_node(&addr).ok())
		.filter(|n| n.is_live(now_msec, heartbeat_interval_msec))
		.map(|n| CarryNode {
			addr: n.addr,
			total: n.total,
			used: n.used,
			carry: 0.0,
		})
		.collect()
}

/// Implements the full 5-step data-partition host selection from the
/// design: topology picks the node-set and the per-rack split, this
/// function carry-selects the actual nodes within each rack. Only
/// live nodes (per `DataNode::is_live`) are considered candidates.
pub fn choose_data_hosts(
	topology: &Topology,
	registry: &NodeRegistry,
	replica_num: usize,
	exclude: &[Address],
	now_msec: u64,
	heartbeat_interval_msec: u64,
) -> Result<Vec<Address>, Error> {
	let placement = topology.alloc_node_set_for_data_node(replica_num)?;
	let mut hosts = Vec::new();
	for alloc in placement.racks {
		let already_picked: Vec<Address> = hosts.clone();
		let mut excluded = exclude.to_vec();
		excluded.extend(already_picked);
		let candidates = data_candidates(topology, registry, placement.node_set_id, &alloc.rack, &excluded, now_msec, heartbeat_interval_msec);
		let picked = carry_select(&candidates, alloc.count)?;
		hosts.extend(picked.into_iter().map(|(addr, _carry)| addr));
	}
	Ok(hosts)
}

/// Meta-partition placement: one node-set, no rack diversity, carry
/// select across every live address in the set regardless of rack.
pub fn choose_meta_hosts(topology: &Topology, registry: &NodeRegistry, replica_num: usize, now_msec: u64, heartbeat_interval_msec: u64) -> Result<Vec<Address>, Error> {
	let node_set_id = topology.alloc_node_set_for_meta_node(replica_num)?;
	let candidates: Vec<CarryNode> = topology
		.racks_in_node_set(node_set_id)
		.into_iter()
		.flat_map(|r| r.addrs)
		.filter_map(|addr| registry.meta_node(&addr).ok())
		.filter(|n| n.is_live(now_msec, heartbeat_interval_msec))
		.map(|n| CarryNode {
			addr: n.addr,
			total: 0,
			used: 0,
			carry: 0.0,
		})
		.collect();
	let picked = carry_select(&candidates, replica_num)?;
	Ok(picked.into_iter().map(|(addr, _carry)| addr).collect())
}

/// Decommission step 4: prefer a replacement from the offline node's
/// own rack; if that rack has no spare live capacity, widen to the
/// whole cluster.
pub fn choose_replacement_host(
	topology: &Topology,
	registry: &NodeRegistry,
	offline_addr: &Address,
	exclude: &[Address],
	now_msec: u64,
	heartbeat_interval_msec: u64,
) -> Result<Address, Error> {
	let (node_set_id, rack) = topology.node_set_and_rack(offline_addr)?;

	let same_rack = data_candidates(topology, registry, node_set_id, &rack, exclude, now_msec, heartbeat_interval_msec);
	if let Ok(picked) = carry_select(&same_rack, 1) {
		return Ok(picked[0].0.clone());
	}

	let cluster_wide: Vec<CarryNode> = topology
		.all_addrs()
		.into_iter()
		.filter(|a| a != offline_addr && !exclude.contains(a))
		.filter_map(|addr| registry.data_node(&addr).ok())
		.filter(|n| n.is_live(now_msec, heartbeat_interval_msec))
		.map(|n| CarryNode {
			addr: n.addr,
			total: n.total,
			used: n.used,
			carry: 0.0,
		})
		.collect();
	let picked = carry_select(&cluster_wide, 1)?;
	Ok(picked[0].0.clone())
}

/// Meta-partition analogue of [`choose_replacement_host`]: no rack
/// preference (meta placement has no rack-diversity requirement), so
/// this widens straight to every live meta node in the offline node's
/// node-set.
pub fn choose_meta_replacement_host(
	topology: &Topology,
	registry: &NodeRegistry,
	offline_addr: &Address,
	exclude: &[Address],
	now_msec: u64,
	heartbeat_interval_msec: u64,
) -> Result<Address, Error> {
	let (node_set_id, _rack) = topology.node_set_and_rack(offline_addr)?;

	let candidates: Vec<CarryNode> = topology
		.racks_in_node_set(node_set_id)
		.into_iter()
		.flat_map(|r| r.addrs)
		.filter(|a| a != offline_addr && !exclude.contains(a))
		.filter_map(|addr| registry.meta_node(&addr).ok())
		.filter(|n| n.is_live(now_msec, heartbeat_interval_msec))
		.map(|n| CarryNode {
			addr: n.addr,
			total: 0,
			used: 0,
			carry: 0.0,
		})
		.collect();
	let picked = carry_select(&candidates, 1)?;
	Ok(picked[0].0.clone())
}
