//! The admin-task envelope (§6, "Data-node / meta-node admin protocol").

use serde::{Deserialize, Serialize};

use cm_util::ids::PartitionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpCode {
	CreateDataPartition,
	CreateMetaPartition,
	HeartbeatData,
	HeartbeatMeta,
	LoadDataPartition,
	DecommissionDataPartitionRemovePeer,
	DecommissionDataPartitionAddPeer,
	DeleteDataPartition,
	DeleteMetaPartition,
}

/// `{opCode, partitionId, body}`, as specified. `body` is an opaque,
/// already-serialized payload; its shape is per-opcode and owned by
/// the caller (the orchestrator or a reconciler loop).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminTask {
	pub op_code: OpCode,
	pub partition_id: PartitionId,
	pub body: Vec<u8>,
}

impl AdminTask {
	pub fn new(op_code: OpCode, partition_id: PartitionId, body: Vec<u8>) -> Self {
		Self { op_code, partition_id, body }
	}
}

/// Replica telemetry carried back on heartbeat/load responses. `extents`
/// is data-partition-only; `max_inode_id` is meta-partition-only (the
/// highest inode id the reporting replica has allocated) — each side
/// leaves the other's field at its default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Telemetry {
	pub used: u64,
	pub available: u64,
	pub extents: u64,
	pub max_inode_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminTaskReply {
	pub ok: bool,
	pub message: String,
	pub telemetry: Option<Telemetry>,
}

impl AdminTaskReply {
	pub fn ok(telemetry: Option<Telemetry>) -> Self {
		Self { ok: true, message: String::new(), telemetry }
	}

	pub fn err(message: impl Into<String>) -> Self {
		Self { ok: false, message: message.into(), telemetry: None }
	}
}
