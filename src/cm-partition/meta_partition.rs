//! Meta partitions (§4.D, §4.I "Update inode range"). Structurally
//! close to data partitions but keyed by an inode range instead of a
//! rack-diverse host set, and the range-split operation proposes
//! directly through the FSM gateway rather than going through the
//! orchestrator.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use cm_fsm::gateway::FsmGateway;
use cm_util::error::Error;
use cm_util::ids::{Address, PartitionId, VolumeId};

use crate::replica::Replica;
use crate::status::PartitionStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedRange {
	start: u64,
	end: Option<u64>,
	max_node_id: u64,
}

struct Inner {
	start: u64,
	/// `None` means unbounded, i.e. the last partition's `(e1, +inf)` range.
	end: Option<u64>,
	hosts: Vec<Address>,
	peers: Vec<Address>,
	status: PartitionStatus,
	replicas: Vec<Replica>,
	max_node_id: u64,
	leader: Option<Address>,
}

pub struct MetaPartition {
	pub id: PartitionId,
	pub volume_name: String,
	pub volume_id: VolumeId,
	gateway: Arc<FsmGateway>,
	inner: Mutex<Inner>,
	// Held across the decommission sequence's gateway proposal, for the
	// same reason `DataPartition` holds one (§5: never a std lock across
	// an await).
	decommission_gate: tokio::sync::Mutex<()>,
}

impl MetaPartition {
	pub fn new(
		id: PartitionId,
		volume_name: String,
		volume_id: VolumeId,
		start: u64,
		end: Option<u64>,
		hosts: Vec<Address>,
		gateway: Arc<FsmGateway>,
	) -> Self {
		let peers = hosts.clone();
		let replicas = hosts.iter().cloned().map(Replica::new).collect();
		Self {
			id,
			volume_name,
			volume_id,
			gateway,
			inner: Mutex::new(Inner {
				start,
				end,
				hosts,
				peers,
				status: PartitionStatus::Unavailable,
				replicas,
				max_node_id: 0,
				leader: None,
			}),
			decommission_gate: tokio::sync::Mutex::new(()),
		}
	}

	pub fn decommission_gate(&self) -> &tokio::sync::Mutex<()> {
		&self.decommission_gate
	}

	pub fn range(&self) -> (u64, Option<u64>) {
		let inner = self.inner.lock().unwrap();
		(inner.start, inner.end)
	}

	pub fn hosts(&self) -> Vec<Address> {
		self.inner.lock().unwrap().hosts.clone()
	}

	pub fn status(&self) -> PartitionStatus {
		self.inner.lock().unwrap().status
	}

	pub fn max_node_id(&self) -> u64 {
		self.inner.lock().unwrap().max_node_id
	}

	pub fn leader(&self) -> Option<Address> {
		self.inner.lock().unwrap().leader.clone()
	}

	pub fn mark_read_write(&self) {
		self.inner.lock().unwrap().status = PartitionStatus::ReadWrite;
	}

	/// Whether `addr` can be taken offline without dropping below quorum,
	/// mirroring `DataPartition::can_be_offline`.
	pub fn can_be_offline(&self, addr: &Address) -> bool {
		let inner = self.inner.lock().unwrap();
		let quorum = inner.hosts.len() / 2 + 1;
		inner.hosts.contains(addr) && inner.hosts.len() >= quorum.max(1)
	}

	/// Carries forward every peer but `offline_addr`, appending `new_addr`.
	pub fn compose_new_peers(&self, offline_addr: &Address, new_addr: &Address) -> Vec<Address> {
		let inner = self.inner.lock().unwrap();
		let mut peers: Vec<Address> = inner.peers.iter().filter(|p| *p != offline_addr).cloned().collect();
		peers.push(new_addr.clone());
		peers
	}

	/// Replaces `offline_addr` with `new_addr` in both hosts and peers.
	pub fn apply_replacement(&self, offline_addr: &Address, new_addr: &Address) {
		let mut inner = self.inner.lock().unwrap();
		for h in inner.hosts.iter_mut() {
			if h == offline_addr {
				*h = new_addr.clone();
			}
		}
		inner.peers.retain(|p| p != offline_addr);
		inner.peers.push(new_addr.clone());
		inner.replicas.retain(|r| &r.addr != offline_addr);
		inner.replicas.push(Replica::new(new_addr.clone()));
		if inner.leader.as_ref() == Some(offline_addr) {
			inner.leader = None;
		}
	}

	pub fn report_replica(&self, addr: &Address, telemetry: cm_rpc::Telemetry, is_leader: bool) {
		let mut inner = self.inner.lock().unwrap();
		if is_leader {
			inner.leader = Some(addr.clone());
			if let Some(observed) = telemetry.max_inode_id {
				if observed > inner.max_node_id {
					inner.max_node_id = observed;
				}
			}
		}
		if let Some(r) = inner.replicas.iter_mut().find(|r| &r.addr == addr) {
			r.report(telemetry, is_leader);
		}
	}

	pub fn check_status(&self, now_msec: u64, heartbeat_interval_msec: u64) -> PartitionStatus {
		let mut inner = self.inner.lock().unwrap();
		let quorum = inner.hosts.len() / 2 + 1;
		let fresh = inner
			.hosts
			.clone()
			.into_iter()
			.filter(|h| {
				inner
					.replicas
					.iter()
					.find(|r| &r.addr == h)
					.map(|r| r.is_fresh(now_msec, heartbeat_interval_msec))
					.unwrap_or(false)
			})
			.count();
		inner.status = if fresh == inner.hosts.len() {
			PartitionStatus::ReadWrite
		} else if fresh >= quorum {
			PartitionStatus::ReadOnly
		} else {
			PartitionStatus::Unavailable
		};
		inner.status
	}

	/// Closes this partition's open end bound at `new_start`, so that a
	/// freshly created sibling partition can cover `(new_start, +inf)`.
	/// Requires a known leader and a bound strictly past the highest
	/// inode id this partition has actually observed; the caller (the
	/// orchestrator) is responsible for creating the sibling partition
	/// once this call succeeds.
	pub async fn update_inode_range(&self, new_start: u64) -> Result<(), Error> {
		let (current_max, has_leader) = {
			let inner = self.inner.lock().unwrap();
			(inner.max_node_id, inner.leader.is_some())
		};
		if !has_leader {
			return Err(Error::InvalidArgument(format!(
				"meta partition {} has no known leader, cannot split",
				self.id
			)));
		}
		if new_start <= current_max {
			return Err(Error::InvalidArgument(format!(
				"new start {} must exceed current max node id {}",
				new_start, current_max
			)));
		}

		let start = self.range().0;
		let record = PersistedRange { start, end: Some(new_start), max_node_id: current_max };
		let key = format!("{}/{}", self.volume_id, self.id);
		self.gateway.sync_update_meta_partition(&key, serde_json::to_vec(&record)?).await?;

		self.inner.lock().unwrap().end = Some(new_start);
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use cm_fsm::consensus::InMemoryConsensus;
	use cm_fsm::store::InMemoryStore;

	fn gateway() -> Arc<FsmGateway> {
		let store = Arc::new(InMemoryStore::new());
		let consensus = InMemoryConsensus::new("n1", store.clone());
		Arc::new(FsmGateway::new(consensus, store))
	}

	fn mp() -> MetaPartition {
		MetaPartition::new(
			PartitionId(1),
			"v1".to_string(),
			VolumeId(1),
			0,
			Some(1 << 24),
			vec!["a".to_string(), "b".to_string(), "c".to_string()],
			gateway(),
		)
	}

	#[tokio::test]
	async fn split_requires_a_known_leader() {
		let mp = mp();
		let err = mp.update_inode_range(100).await.unwrap_err();
		assert!(matches!(err, Error::InvalidArgument(_)));
	}

	#[tokio::test]
	async fn split_requires_start_past_observed_max_inode() {
		let mp = mp();
		let mut telemetry = cm_rpc::Telemetry::default();
		telemetry.max_inode_id = Some(10_000);
		mp.report_replica(&"a".to_string(), telemetry, true);
		let err = mp.update_inode_range(9_000).await.unwrap_err();
		assert!(matches!(err, Error::InvalidArgument(_)));
	}

	#[tokio::test]
	async fn successful_split_closes_the_open_end_bound() {
		let mp = mp();
		let mut telemetry = cm_rpc::Telemetry::default();
		telemetry.max_inode_id = Some(10_000);
		mp.report_replica(&"a".to_string(), telemetry, true);
		mp.update_inode_range(10_001).await.unwrap();
		assert_eq!(mp.range().1, Some(10_001));
		let err = mp.update_inode_range(9_000).await.unwrap_err();
		assert!(matches!(err, Error::InvalidArgument(_)));
	}
}
