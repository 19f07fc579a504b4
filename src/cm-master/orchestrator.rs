//! Lifecycle orchestrator (§4.I): create/delete volume, create data and
//! meta partitions, split a meta partition's inode range, and
//! decommission a data/meta partition or a whole node. Every mutation
//! here funnels through the cluster-level locks in the order fixed by
//! §5 (`vol_mutex` before `dp_mutex` before the registry's node locks
//! before any per-volume/per-partition lock) and persists through the
//! FSM gateway (component G) before it is considered durable.

use std::sync::Arc;

use serde::Serialize;

use cm_partition::{DataPartition, MetaPartition, Volume};
use cm_rpc::{AdminTask, OpCode};
use cm_util::error::Error;
use cm_util::ids::{Address, PartitionId, VolumeId};

use crate::cluster::Cluster;
use crate::placement;

#[derive(Serialize)]
struct PersistedDataPartition<'a> {
	volume_id: VolumeId,
	replica_num: usize,
	hosts: &'a [Address],
	peers: &'a [Address],
}

#[derive(Serialize)]
struct PersistedMetaPartition<'a> {
	volume_id: VolumeId,
	start: u64,
	end: Option<u64>,
	replica_num: usize,
	hosts: &'a [Address],
}

#[derive(Serialize)]
struct PersistedVolume<'a> {
	id: VolumeId,
	name: &'a str,
	dp_replica_num: usize,
	mp_replica_num: usize,
	enable_random_write: bool,
	dp_size_bytes: u64,
	capacity_bytes: u64,
}

#[derive(Serialize)]
struct CreateDataPartitionBody<'a> {
	volume_id: VolumeId,
	replica_num: usize,
	hosts: &'a [Address],
	peers: &'a [Address],
}

#[derive(Serialize)]
struct CreateMetaPartitionBody<'a> {
	volume_id: VolumeId,
	start: u64,
	end: Option<u64>,
	hosts: &'a [Address],
}

#[derive(Serialize)]
struct RemovePeerBody<'a> {
	remove: &'a Address,
	new_peers: &'a [Address],
}

#[derive(Serialize)]
struct AddPeerBody<'a> {
	add: &'a Address,
	new_peers: &'a [Address],
}

pub struct LifecycleOrchestrator {
	cluster: Arc<Cluster>,
}

/// Fans `task` out to every host in parallel over a bounded error
/// channel (§4.I, "a bounded error channel"); waits for all replies and
/// surfaces the first error, if any, after every worker has finished.
async fn fan_out(cluster: &Cluster, hosts: &[Address], task_for: impl Fn(&Address) -> AdminTask) -> Result<(), Error> {
	let (tx, mut rx) = tokio::sync::mpsc::channel::<Result<(), Error>>(hosts.len().max(1));
	for host in hosts {
		let dispatcher = cluster.dispatcher.clone();
		let host = host.clone();
		let task = task_for(&host);
		let tx = tx.clone();
		tokio::spawn(async move {
			let result = dispatcher.sync_send_admin_task(&host, task).await.map(|_| ());
			let _ = tx.send(result).await;
		});
	}
	drop(tx);

	let mut first_err = None;
	while let Some(result) = rx.recv().await {
		if let Err(e) = result {
			if first_err.is_none() {
				first_err = Some(e);
			}
		}
	}
	match first_err {
		Some(e) => Err(e),
		None => Ok(()),
	}
}

impl LifecycleOrchestrator {
	pub fn new(cluster: Arc<Cluster>) -> Self {
		Self { cluster }
	}

	/// `createVol`: validates name uniqueness, allocates an id, persists
	/// the volume record, then initializes its meta and data partitions.
	/// Any failure marks the partial volume `markDelete` and removes it
	/// from the cluster's volume map.
	pub async fn create_vol(
		&self,
		name: &str,
		dp_replica_num: usize,
		mp_replica_num: usize,
		enable_random_write: bool,
		dp_size_bytes: u64,
		capacity_bytes: u64,
	) -> Result<Arc<Volume>, Error> {
		if self.cluster.has_volume(name) {
			return Err(Error::AlreadyExists(format!("volume {}", name)));
		}

		let id = VolumeId(self.cluster.id_allocator.allocate_common().await?);
		let persisted = PersistedVolume {
			id,
			name,
			dp_replica_num,
			mp_replica_num,
			enable_random_write,
			dp_size_bytes,
			capacity_bytes,
		};
		self.cluster
			.gateway
			.sync_add_vol(name, serde_json::to_vec(&persisted)?)
			.await?;

		let volume = Arc::new(Volume::new(
			id,
			name.to_string(),
			dp_replica_num,
			mp_replica_num,
			enable_random_write,
			dp_size_bytes,
			capacity_bytes,
		));
		self.cluster.insert_volume(volume.clone());

		let mp_result = {
			let volume = volume.clone();
			volume
				.init_meta_partitions(|start, end| {
					let volume = volume.clone();
					async move { self.create_meta_partition_for(&volume, start, end).await }
				})
				.await
		};
		if let Err(e) = mp_result {
			self.rollback_partial_volume(name).await;
			return Err(e);
		}

		let dp_result = {
			let volume = volume.clone();
			volume
				.init_data_partitions(cm_partition::volume::DEFAULT_INIT_DATA_PARTITION_CNT, || {
					let volume = volume.clone();
					async move { self.create_data_partition_for(&volume).await }
				})
				.await
		};
		if let Err(e) = dp_result {
			self.rollback_partial_volume(name).await;
			return Err(e);
		}

		Ok(volume)
	}

	async fn rollback_partial_volume(&self, name: &str) {
		warn!("cluster {}: rolling back partially created volume {}", self.cluster.name, name);
		if let Ok(volume) = self.cluster.volume(name) {
			volume.mark_delete();
		}
		if let Err(e) = self.cluster.gateway.sync_delete_vol(name).await {
			warn!("cluster {}: failed to persist rollback of volume {}: {}", self.cluster.name, name, e);
		}
		self.cluster.remove_volume(name);
	}

	/// `markDeleteVol`: idempotent — marking an already-deleted volume
	/// does nothing further.
	pub async fn mark_delete_vol(&self, name: &str) -> Result<(), Error> {
		let volume = self.cluster.volume(name)?;
		if volume.status() == cm_partition::VolumeStatus::MarkDelete {
			return Ok(());
		}
		volume.mark_delete();
		self.cluster.gateway.sync_update_vol(name, vec![]).await
	}

	/// `updateVol`: only capacity growth is modeled here; shrinking is
	/// rejected by `Volume::update_capacity`.
	pub async fn update_vol_capacity(&self, name: &str, new_capacity: u64) -> Result<(), Error> {
		let volume = self.cluster.volume(name)?;
		volume.update_capacity(new_capacity)?;
		self.cluster.gateway.sync_update_vol(name, vec![]).await
	}

	async fn create_data_partition_for(&self, volume: &Arc<Volume>) -> Result<Arc<DataPartition>, Error> {
		let now = cm_util::time::now_msec();
		let hb_msec = self.cluster.config.heartbeat_interval_secs * 1000;
		let hosts = placement::choose_data_hosts(&self.cluster.topology, &self.cluster.registry, volume.dp_replica_num, &[], now, hb_msec)?;
		let id = PartitionId(self.cluster.id_allocator.allocate_data_partition_id().await?);
		let peers = hosts.clone();

		let body = serde_json::to_vec(&CreateDataPartitionBody {
			volume_id: volume.id,
			replica_num: volume.dp_replica_num,
			hosts: &hosts,
			peers: &peers,
		})?;
		fan_out(&self.cluster, &hosts, |_addr| AdminTask::new(OpCode::CreateDataPartition, id, body.clone())).await?;

		let persisted = PersistedDataPartition {
			volume_id: volume.id,
			replica_num: volume.dp_replica_num,
			hosts: &hosts,
			peers: &peers,
		};
		self.cluster
			.gateway
			.sync_add_data_partition(&format!("{}/{}", volume.id, id), serde_json::to_vec(&persisted)?)
			.await?;

		let dp = Arc::new(DataPartition::new(id, volume.name.clone(), volume.id, volume.dp_replica_num, hosts));
		dp.mark_read_write();
		Ok(dp)
	}

	/// `createDataPartition`: the standalone entry point (used directly
	/// by operators and by the auto-creation reconciler), which — unlike
	/// the volume-init path above — inserts the new partition into the
	/// volume itself once created.
	pub async fn create_data_partition(&self, vol_name: &str) -> Result<Arc<DataPartition>, Error> {
		let _gate = self.cluster.dp_mutex.lock().await;
		let volume = self.cluster.volume(vol_name)?;
		let dp = self.create_data_partition_for(&volume).await?;
		volume.insert_data_partition(dp.clone());
		Ok(dp)
	}

	async fn create_meta_partition_for(&self, volume: &Arc<Volume>, start: u64, end: Option<u64>) -> Result<Arc<MetaPartition>, Error> {
		let now = cm_util::time::now_msec();
		let hb_msec = self.cluster.config.heartbeat_interval_secs * 1000;
		let hosts = placement::choose_meta_hosts(&self.cluster.topology, &self.cluster.registry, volume.mp_replica_num, now, hb_msec)?;
		let id = PartitionId(self.cluster.id_allocator.allocate_meta_partition_id().await?);

		let body = serde_json::to_vec(&CreateMetaPartitionBody { volume_id: volume.id, start, end, hosts: &hosts })?;
		fan_out(&self.cluster, &hosts, |_addr| AdminTask::new(OpCode::CreateMetaPartition, id, body.clone())).await?;

		let persisted = PersistedMetaPartition { volume_id: volume.id, start, end, replica_num: volume.mp_replica_num, hosts: &hosts };
		self.cluster
			.gateway
			.sync_add_meta_partition(&format!("{}/{}", volume.id, id), serde_json::to_vec(&persisted)?)
			.await?;

		let mp = Arc::new(MetaPartition::new(id, volume.name.clone(), volume.id, start, end, hosts, self.cluster.gateway.clone()));
		mp.mark_read_write();
		Ok(mp)
	}

	/// `updateInodeIDRange`: closes the current open-ended meta
	/// partition's range at `new_start`, then creates a fresh sibling
	/// covering `(new_start, +inf)`.
	pub async fn update_inode_id_range(&self, vol_name: &str, new_start: u64) -> Result<Arc<MetaPartition>, Error> {
		let volume = self.cluster.volume(vol_name)?;
		let tail = volume
			.open_ended_meta_partition()
			.ok_or_else(|| Error::NotFound(format!("volume {} has no open-ended meta partition", vol_name)))?;

		tail.update_inode_range(new_start).await?;

		let mp = self.create_meta_partition_for(&volume, new_start, None).await?;
		volume.push_meta_partition(mp.clone());
		Ok(mp)
	}

	/// `decommissionDataPartition`: replaces the replica on `offline_addr`
	/// with one on a freshly chosen host, preserving the replication
	/// factor. Steps follow §4.I exactly.
	pub async fn decommission_data_partition(&self, dp: &Arc<DataPartition>, offline_addr: &Address, reason: &str) -> Result<(), Error> {
		let _gate = dp.decommission_gate().lock().await;

		if !dp.hosts().contains(offline_addr) {
			return Err(Error::InvalidArgument(format!(
				"{} is not a host of data partition {}",
				offline_addr, dp.id
			)));
		}
		if !dp.can_be_offline(offline_addr) {
			return Err(Error::QuorumLost(format!(
				"data partition {} already has a missing replica, cannot take {} offline ({})",
				dp.id, offline_addr, reason
			)));
		}

		let exclude = dp.hosts();
		let now = cm_util::time::now_msec();
		let hb_msec = self.cluster.config.heartbeat_interval_secs * 1000;
		let new_host = placement::choose_replacement_host(&self.cluster.topology, &self.cluster.registry, offline_addr, &exclude, now, hb_msec)?;

		let new_peers = dp.compose_new_peers(offline_addr, &new_host);
		let remove_body = serde_json::to_vec(&RemovePeerBody { remove: offline_addr, new_peers: &new_peers })?;
		let remove_task = AdminTask::new(OpCode::DecommissionDataPartitionRemovePeer, dp.id, remove_body);
		self.cluster.dispatcher.sync_send_admin_task(offline_addr, remove_task).await?;

		let new_hosts: Vec<Address> = dp
			.hosts()
			.iter()
			.map(|h| if h == offline_addr { new_host.clone() } else { h.clone() })
			.collect();
		let persisted = PersistedDataPartition {
			volume_id: dp.volume_id,
			replica_num: dp.replica_num,
			hosts: &new_hosts,
			peers: &new_peers,
		};
		self.cluster
			.gateway
			.sync_update_data_partition(&format!("{}/{}", dp.volume_id, dp.id), serde_json::to_vec(&persisted)?)
			.await?;

		dp.apply_replacement(offline_addr, &new_host);

		let add_body = serde_json::to_vec(&AddPeerBody { add: &new_host, new_peers: &new_peers })?;
		let add_task = AdminTask::new(OpCode::DecommissionDataPartitionAddPeer, dp.id, add_body);
		self.cluster.dispatcher.sync_send_admin_task(&new_host, add_task).await?;

		let disk_path = format!("disk-{}", dp.id);
		self.cluster.mark_bad_partition(offline_addr, &disk_path, dp.id);

		Ok(())
	}

	/// `dataNodeOffLine`: decommissions every data partition hosted on
	/// `addr`, then removes the node from the registry/topology. Unlike
	/// meta-node decommission, the first per-partition error aborts the
	/// whole walk so operators see it immediately.
	pub async fn data_node_off_line(&self, addr: &Address) -> Result<(), Error> {
		for volume in self.cluster.all_volumes() {
			for dp in volume.data_partitions() {
				if dp.hosts().contains(addr) {
					self.decommission_data_partition(&dp, addr, "node decommission").await?;
				}
			}
		}

		self.cluster.registry.delete_data_node(addr).await?;
		self.cluster.dispatcher.close(addr);
		Ok(())
	}

	/// `decommissionMetaPartition`: meta-partition analogue of
	/// `decommission_data_partition` — no rack preference, and no
	/// separate `badPartitions` index entry (the design reserves that
	/// index for data partitions' disk paths).
	pub async fn decommission_meta_partition(&self, mp: &Arc<MetaPartition>, offline_addr: &Address) -> Result<(), Error> {
		let _gate = mp.decommission_gate().lock().await;

		if !mp.hosts().contains(offline_addr) {
			return Err(Error::InvalidArgument(format!(
				"{} is not a host of meta partition {}",
				offline_addr, mp.id
			)));
		}
		if !mp.can_be_offline(offline_addr) {
			return Err(Error::QuorumLost(format!(
				"meta partition {} already has a missing replica, cannot take {} offline",
				mp.id, offline_addr
			)));
		}

		let exclude = mp.hosts();
		let now = cm_util::time::now_msec();
		let hb_msec = self.cluster.config.heartbeat_interval_secs * 1000;
		let new_host = placement::choose_meta_replacement_host(&self.cluster.topology, &self.cluster.registry, offline_addr, &exclude, now, hb_msec)?;

		let new_peers = mp.compose_new_peers(offline_addr, &new_host);
		let remove_body = serde_json::to_vec(&RemovePeerBody { remove: offline_addr, new_peers: &new_peers })?;
		let remove_task = AdminTask::new(OpCode::DecommissionDataPartitionRemovePeer, mp.id, remove_body);
		self.cluster.dispatcher.sync_send_admin_task(offline_addr, remove_task).await?;

		let new_hosts: Vec<Address> = mp
			.hosts()
			.iter()
			.map(|h| if h == offline_addr { new_host.clone() } else { h.clone() })
			.collect();
		let (start, end) = mp.range();
		let persisted = PersistedMetaPartition { volume_id: mp.volume_id, start, end, replica_num: new_hosts.len(), hosts: &new_hosts };
		self.cluster
			.gateway
			.sync_update_meta_partition(&format!("{}/{}", mp.volume_id, mp.id), serde_json::to_vec(&persisted)?)
			.await?;

		mp.apply_replacement(offline_addr, &new_host);

		let add_body = serde_json::to_vec(&AddPeerBody { add: &new_host, new_peers: &new_peers })?;
		let add_task = AdminTask::new(OpCode::DecommissionDataPartitionAddPeer, mp.id, add_body);
		self.cluster.dispatcher.sync_send_admin_task(&new_host, add_task).await?;

		Ok(())
	}

	/// `metaNodeOffLine`: analogous to `data_node_off_line`, but
	/// per-partition errors are logged and swallowed — operators inspect
	/// `badPartitions`/metrics instead of the whole walk aborting.
	pub async fn meta_node_off_line(&self, addr: &Address) -> Result<(), Error> {
		for volume in self.cluster.all_volumes() {
			for mp in volume.meta_partitions() {
				if mp.hosts().contains(addr) {
					if let Err(e) = self.decommission_meta_partition(&mp, addr).await {
						warn!(
							"cluster {}: failed to decommission meta partition {} off {}: {}; operator must inspect and heal manually",
							self.cluster.name, mp.id, addr, e
						);
					}
				}
			}
		}

		if let Err(e) = self.cluster.registry.delete_meta_node(addr).await {
			warn!("cluster {}: failed to delete meta node {}: {}", self.cluster.name, addr, e);
			return Err(e);
		}
		self.cluster.dispatcher.close(addr);
		Ok(())
	}
}
