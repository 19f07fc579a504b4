//! Data/meta node records (§3, §4.C). Mirrors the shape of a
//! persisted `dataNode/<addr>` / `metaNode/<addr>` record plus the
//! purely in-memory bits (connection pool handle, last report time)
//! that never go through the FSM gateway.

use serde::{Deserialize, Serialize};

use cm_util::ids::{Address, NodeId, NodeSetId};

/// Persisted portion of a data node record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataNode {
	pub id: NodeId,
	pub addr: Address,
	pub node_set_id: NodeSetId,
	pub rack: String,
	pub total: u64,
	pub used: u64,
	pub is_active: bool,
	#[serde(skip, default)]
	pub last_report_msec: u64,
}

impl DataNode {
	pub fn new(id: NodeId, addr: Address, node_set_id: NodeSetId, rack: String) -> Self {
		Self {
			id,
			addr,
			node_set_id,
			rack,
			total: 0,
			used: 0,
			is_active: true,
			last_report_msec: cm_util::time::now_msec(),
		}
	}

	pub fn is_live(&self, now_msec: u64, heartbeat_interval_msec: u64) -> bool {
		self.is_active && !cm_util::time::is_stale(now_msec, self.last_report_msec, heartbeat_interval_msec)
	}
}

/// Persisted portion of a meta node record. Meta nodes carry no
/// capacity/used figures in the design — placement weighs them purely
/// by carry, seeded from zero, since inode-range metadata has no
/// meaningful "bytes used" figure at this layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaNode {
	pub id: NodeId,
	pub addr: Address,
	pub node_set_id: NodeSetId,
	pub rack: String,
	pub is_active: bool,
	#[serde(skip, default)]
	pub last_report_msec: u64,
}

impl MetaNode {
	pub fn new(id: NodeId, addr: Address, node_set_id: NodeSetId, rack: String) -> Self {
		Self {
			id,
			addr,
			node_set_id,
			rack,
			is_active: true,
			last_report_msec: cm_util::time::now_msec(),
		}
	}

	pub fn is_live(&self, now_msec: u64, heartbeat_interval_msec: u64) -> bool {
		self.is_active && !cm_util::time::is_stale(now_msec, self.last_report_msec, heartbeat_interval_msec)
	}
}
