//! Records proposed through the FSM gateway. A record is an opaque byte
//! string with a typed prefix (§6, "Persisted state"): the `kind` and
//! `key` are the prefix, `value` is the opaque payload the higher-level
//! crates (de)serialize.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
	AllocCommonId,
	AllocDataPartitionId,
	AllocMetaPartitionId,
	AddVol,
	UpdateVol,
	DeleteVol,
	AddMetaNode,
	DeleteMetaNode,
	AddDataNode,
	DeleteDataNode,
	AddDataPartition,
	UpdateDataPartition,
	AddMetaPartition,
	UpdateMetaPartition,
	AddNodeSet,
	UpdateNodeSet,
}

impl RecordKind {
	/// Key prefix used when persisting to the store, matching §6's
	/// `id/common`, `nodeSet/<id>`, `vol/<name>`, `dp/<volId>/<id>`, ...
	pub fn prefix(&self) -> &'static str {
		match self {
			RecordKind::AllocCommonId => "id/common",
			RecordKind::AllocDataPartitionId => "id/dp",
			RecordKind::AllocMetaPartitionId => "id/mp",
			RecordKind::AddVol | RecordKind::UpdateVol | RecordKind::DeleteVol => "vol",
			RecordKind::AddMetaNode | RecordKind::DeleteMetaNode => "metaNode",
			RecordKind::AddDataNode | RecordKind::DeleteDataNode => "dataNode",
			RecordKind::AddDataPartition | RecordKind::UpdateDataPartition => "dp",
			RecordKind::AddMetaPartition | RecordKind::UpdateMetaPartition => "mp",
			RecordKind::AddNodeSet | RecordKind::UpdateNodeSet => "nodeSet",
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
	pub kind: RecordKind,
	pub key: String,
	pub value: Vec<u8>,
}

impl Record {
	pub fn new(kind: RecordKind, key: impl Into<String>, value: Vec<u8>) -> Self {
		Record {
			kind,
			key: key.into(),
			value,
		}
	}

	/// Full store key, e.g. `vol/mybucket` or `dp/3/17`.
	pub fn store_key(&self) -> String {
		format!("{}/{}", self.kind.prefix(), self.key)
	}

	pub fn is_delete(&self) -> bool {
		matches!(self.kind, RecordKind::DeleteVol | RecordKind::DeleteMetaNode | RecordKind::DeleteDataNode)
	}
}
