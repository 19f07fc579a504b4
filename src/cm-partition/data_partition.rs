//! Data partitions (§4.D). All mutable state lives behind one
//! `std::sync::Mutex` per partition; every method below locks, copies
//! or mutates, and releases before returning — never while awaiting
//! I/O or a proposal (§5).

use std::sync::Mutex;

use cm_util::ids::{Address, PartitionId, VolumeId};

use crate::replica::Replica;
use crate::status::PartitionStatus;

struct Inner {
	hosts: Vec<Address>,
	peers: Vec<Address>,
	status: PartitionStatus,
	replicas: Vec<Replica>,
	is_recover: bool,
	miss_replicas: Vec<Address>,
	last_load_msec: u64,
}

pub struct DataPartition {
	pub id: PartitionId,
	pub volume_name: String,
	pub volume_id: VolumeId,
	pub replica_num: usize,
	inner: Mutex<Inner>,
	// Held for the whole decommission sequence (§4.I), which spans a
	// remote create RPC and a gateway proposal; a plain std Mutex can't
	// be held across those awaits.
	decommission_gate: tokio::sync::Mutex<()>,
}

impl DataPartition {
	pub fn new(id: PartitionId, volume_name: String, volume_id: VolumeId, replica_num: usize, hosts: Vec<Address>) -> Self {
		let peers = hosts.clone();
		let replicas = hosts.iter().cloned().map(Replica::new).collect();
		Self {
			id,
			volume_name,
			volume_id,
			replica_num,
			inner: Mutex::new(Inner {
				hosts,
				peers,
				status: PartitionStatus::Unavailable,
				replicas,
				is_recover: false,
				miss_replicas: Vec::new(),
				last_load_msec: 0,
			}),
			decommission_gate: tokio::sync::Mutex::new(()),
		}
	}

	pub fn decommission_gate(&self) -> &tokio::sync::Mutex<()> {
		&self.decommission_gate
	}

	pub fn hosts(&self) -> Vec<Address> {
		self.inner.lock().unwrap().hosts.clone()
	}

	pub fn peers(&self) -> Vec<Address> {
		self.inner.lock().unwrap().peers.clone()
	}

	pub fn status(&self) -> PartitionStatus {
		self.inner.lock().unwrap().status
	}

	pub fn is_recover(&self) -> bool {
		self.inner.lock().unwrap().is_recover
	}

	pub fn miss_replicas(&self) -> Vec<Address> {
		self.inner.lock().unwrap().miss_replicas.clone()
	}

	pub fn mark_read_write(&self) {
		let mut inner = self.inner.lock().unwrap();
		inner.status = PartitionStatus::ReadWrite;
		inner.is_recover = false;
	}

	pub fn last_load_msec(&self) -> u64 {
		self.inner.lock().unwrap().last_load_msec
	}

	pub fn record_load(&self, now_msec: u64) {
		self.inner.lock().unwrap().last_load_msec = now_msec;
	}

	pub fn report_replica(&self, addr: &Address, telemetry: cm_rpc::Telemetry, is_leader: bool) {
		let mut inner = self.inner.lock().unwrap();
		if let Some(r) = inner.replicas.iter_mut().find(|r| &r.addr == addr) {
			r.report(telemetry, is_leader);
		}
	}

	/// Recomputes status from the freshness of each host's last replica
	/// report. All hosts fresh: `ReadWrite`. At least a write quorum
	/// fresh: `ReadOnly`. Below quorum: `Unavailable`.
	pub fn check_status(&self, now_msec: u64, heartbeat_interval_msec: u64) -> PartitionStatus {
		let mut inner = self.inner.lock().unwrap();
		let quorum = inner.hosts.len() / 2 + 1;
		let mut fresh = 0;
		let mut miss = Vec::new();
		for host in inner.hosts.clone() {
			let is_fresh = inner
				.replicas
				.iter()
				.find(|r| r.addr == host)
				.map(|r| r.is_fresh(now_msec, heartbeat_interval_msec))
				.unwrap_or(false);
			if is_fresh {
				fresh += 1;
			} else {
				miss.push(host);
			}
		}

		inner.status = if fresh == inner.hosts.len() {
			PartitionStatus::ReadWrite
		} else if fresh >= quorum {
			PartitionStatus::ReadOnly
		} else {
			PartitionStatus::Unavailable
		};
		inner.miss_replicas = miss;
		inner.status
	}

	/// Whether `addr` can be taken offline without dropping below
	/// quorum; the design's `canBeOffLine` check.
	pub fn can_be_offline(&self, addr: &Address) -> bool {
		let inner = self.inner.lock().unwrap();
		inner.hosts.contains(addr) && inner.miss_replicas.is_empty()
	}

	/// Carries forward every peer but `offline_addr`, appending `new_addr`.
	pub fn compose_new_peers(&self, offline_addr: &Address, new_addr: &Address) -> Vec<Address> {
		let inner = self.inner.lock().unwrap();
		let mut peers: Vec<Address> = inner.peers.iter().filter(|p| *p != offline_addr).cloned().collect();
		peers.push(new_addr.clone());
		peers
	}

	/// Replaces `offline_addr` with `new_addr` in both hosts and peers,
	/// removes the dead replica, and marks the partition recovering.
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
		inner.status = PartitionStatus::ReadOnly;
		inner.is_recover = true;
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn dp() -> DataPartition {
		DataPartition::new(
			PartitionId(1),
			"v1".to_string(),
			VolumeId(1),
			3,
			vec!["a".to_string(), "b".to_string(), "c".to_string()],
		)
	}

	#[test]
	fn all_hosts_fresh_is_read_write() {
		let dp = dp();
		for addr in ["a", "b", "c"] {
			dp.report_replica(&addr.to_string(), cm_rpc::Telemetry::default(), false);
		}
		assert_eq!(dp.check_status(0, 10_000), PartitionStatus::ReadWrite);
	}

	#[test]
	fn below_quorum_is_unavailable() {
		let dp = dp();
		dp.report_replica(&"a".to_string(), cm_rpc::Telemetry::default(), false);
		assert_eq!(dp.check_status(0, 10), PartitionStatus::Unavailable);
	}

	#[test]
	fn offline_is_rejected_once_a_replica_is_already_missing() {
		let dp = dp();
		for addr in ["a", "b"] {
			dp.report_replica(&addr.to_string(), cm_rpc::Telemetry::default(), false);
		}
		dp.check_status(0, 10_000);
		assert!(!dp.can_be_offline(&"b".to_string()));
	}

	#[test]
	fn compose_new_peers_drops_offline_and_appends_new() {
		let dp = dp();
		let peers = dp.compose_new_peers(&"b".to_string(), &"d".to_string());
		assert_eq!(peers, vec!["a".to_string(), "c".to_string(), "d".to_string()]);
	}

	#[test]
	fn apply_replacement_marks_read_only_and_recovering() {
		let dp = dp();
		dp.apply_replacement(&"b".to_string(), &"d".to_string());
		assert_eq!(dp.status(), PartitionStatus::ReadOnly);
		assert!(dp.is_recover());
		assert_eq!(dp.hosts(), vec!["a".to_string(), "d".to_string(), "c".to_string()]);
	}
}
