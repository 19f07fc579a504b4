//! Reconciler scheduler (§4.H): a set of independent, leader-gated
//! background loops that enforce invariants by comparing desired and
//! observed state. Every loop is best-effort — errors are logged, never
//! propagated — and idempotent under repeated execution across leader
//! changes. Modeled on the teacher's `discovery_loop`/
//! `status_exchange_loop` pattern in `rpc/system.rs::run`: a
//! `tokio::select!` between a sleep and a `watch::Receiver<bool>`
//! shutdown signal, gated each iteration by a leader check.
//!
//! Resolves the open question in the design about
//! `scheduleToCheckVolStatus`: every loop here samples `is_leader()`
//! through the same nil-safe helper, so there is no loop that skips the
//! check the others perform.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::watch;

use cm_partition::{PartitionStatus, VolumeStatus};
use cm_rpc::{AdminTask, OpCode};
use cm_util::ids::PartitionId;

use crate::cluster::Cluster;
use crate::orchestrator::LifecycleOrchestrator;

const STARTUP_GRACE: Duration = Duration::from_secs(120);
const AUTO_CREATE_PERIOD: Duration = Duration::from_secs(120);
const LOAD_DATA_PARTITION_PERIOD: Duration = Duration::from_secs(1);
const DISK_RECOVERY_PERIOD: Duration = Duration::from_secs(30);
const LOAD_META_PARTITION_PERIOD: Duration = Duration::from_secs(30);

/// Snapshot of cluster-wide capacity/usage, refreshed by `updateStatInfo`.
#[derive(Debug, Clone, Default)]
pub struct StatInfo {
	pub total_data_nodes: usize,
	pub live_data_nodes: usize,
	pub total_meta_nodes: usize,
	pub live_meta_nodes: usize,
	pub total_used_bytes: u64,
	pub total_capacity_bytes: u64,
}

async fn leader_gated_loop<F, Fut>(cluster: Arc<Cluster>, period: Duration, mut must_exit: watch::Receiver<bool>, mut tick: F)
where
	F: FnMut() -> Fut,
	Fut: Future<Output = ()>,
{
	while !*must_exit.borrow() {
		if cluster.is_leader() {
			tick().await;
		}
		tokio::select! {
			_ = tokio::time::sleep(period) => {},
			_ = must_exit.changed() => {},
		}
	}
}

pub struct Reconciler {
	cluster: Arc<Cluster>,
	orchestrator: Arc<LifecycleOrchestrator>,
	started_at: Instant,
	stat_info: RwLock<StatInfo>,
	data_partitions_released: AtomicU64,
}

impl Reconciler {
	pub fn new(cluster: Arc<Cluster>, orchestrator: Arc<LifecycleOrchestrator>) -> Arc<Self> {
		Arc::new(Self {
			cluster,
			orchestrator,
			started_at: Instant::now(),
			stat_info: RwLock::new(StatInfo::default()),
			data_partitions_released: AtomicU64::new(0),
		})
	}

	pub fn stat_info(&self) -> StatInfo {
		self.stat_info.read().unwrap().clone()
	}

	/// Spawns every reconciler loop and returns once `must_exit` fires,
	/// mirroring the teacher's `System::run`.
	pub async fn run(self: Arc<Self>, must_exit: watch::Receiver<bool>) {
		let heartbeat = Duration::from_secs(self.cluster.config.heartbeat_interval_secs);
		let check_dp = Duration::from_secs(self.cluster.config.interval_to_check_data_partition_secs);
		let free_dp = Duration::from_secs(self.cluster.config.interval_to_free_data_partition_secs);

		tokio::join!(
			self.clone().update_stat_info_loop(heartbeat, must_exit.clone()),
			self.clone().check_auto_data_partition_creation_loop(must_exit.clone()),
			self.clone().check_data_partitions_loop(check_dp, must_exit.clone()),
			self.clone().load_data_partitions_loop(must_exit.clone()),
			self.clone().check_release_data_partitions_loop(free_dp, must_exit.clone()),
			self.clone().check_heartbeat_data_loop(heartbeat, must_exit.clone()),
			self.clone().check_heartbeat_meta_loop(heartbeat, must_exit.clone()),
			self.clone().check_meta_partitions_loop(check_dp, must_exit.clone()),
			self.clone().check_vol_status_loop(check_dp, must_exit.clone()),
			self.clone().check_disk_recovery_progress_loop(must_exit.clone()),
			self.clone().check_load_meta_partitions_loop(must_exit.clone()),
		);
	}

	async fn update_stat_info_loop(self: Arc<Self>, period: Duration, must_exit: watch::Receiver<bool>) {
		let cluster = self.cluster.clone();
		leader_gated_loop(cluster.clone(), period, must_exit, move || {
			let this = self.clone();
			let cluster = cluster.clone();
			async move { this.update_stat_info(&cluster) }
		})
		.await;
	}

	fn update_stat_info(&self, cluster: &Cluster) {
		let now = cm_util::time::now_msec();
		let hb_msec = cluster.config.heartbeat_interval_secs * 1000;
		let data_nodes = cluster.registry.all_data_nodes();
		let meta_nodes = cluster.registry.all_meta_nodes();
		let live_data_nodes = data_nodes.iter().filter(|n| n.is_live(now, hb_msec)).count();
		let live_meta_nodes = meta_nodes.iter().filter(|n| n.is_live(now, hb_msec)).count();
		let total_used_bytes = data_nodes.iter().map(|n| n.used).sum();
		let total_capacity_bytes = data_nodes.iter().map(|n| n.total).sum();

		*self.stat_info.write().unwrap() = StatInfo {
			total_data_nodes: data_nodes.len(),
			live_data_nodes,
			total_meta_nodes: meta_nodes.len(),
			live_meta_nodes,
			total_used_bytes,
			total_capacity_bytes,
		};
	}

	async fn check_auto_data_partition_creation_loop(self: Arc<Self>, must_exit: watch::Receiver<bool>) {
		let cluster = self.cluster.clone();
		leader_gated_loop(cluster.clone(), AUTO_CREATE_PERIOD, must_exit, move || {
			let this = self.clone();
			async move { this.check_auto_data_partition_creation().await }
		})
		.await;
	}

	async fn check_auto_data_partition_creation(&self) {
		if self.started_at.elapsed() < STARTUP_GRACE {
			return;
		}
		self.fill_volumes_under_threshold().await;
	}

	/// The per-volume auto-creation fill itself, split out from the
	/// startup-grace gate above so it can be driven directly (by a test,
	/// or by an operator-triggered "rebalance now") without waiting out
	/// the grace period.
	pub async fn fill_volumes_under_threshold(&self) {
		if !self.cluster.should_auto_allocate() {
			return;
		}
		for volume in self.cluster.all_volumes() {
			let threshold = self.cluster.config.default_init_data_partition_cnt;
			let writable = volume.rw_data_partition_ids().len();
			if writable >= threshold {
				continue;
			}
			for _ in writable..threshold {
				if let Err(e) = self.orchestrator.create_data_partition(&volume.name).await {
					warn!(
						"cluster {}: auto-creation of a data partition for volume {} failed: {}",
						self.cluster.name, volume.name, e
					);
				}
			}
		}
	}

	async fn check_data_partitions_loop(self: Arc<Self>, period: Duration, must_exit: watch::Receiver<bool>) {
		let cluster = self.cluster.clone();
		leader_gated_loop(cluster.clone(), period, must_exit, move || {
			let cluster = cluster.clone();
			async move { Self::check_data_partitions(&cluster) }
		})
		.await;
	}

	fn check_data_partitions(cluster: &Cluster) {
		let now = cm_util::time::now_msec();
		let hb_msec = cluster.config.heartbeat_interval_secs * 1000;
		for volume in cluster.all_volumes() {
			volume.check_data_partitions(now, hb_msec);
		}
	}

	async fn load_data_partitions_loop(self: Arc<Self>, must_exit: watch::Receiver<bool>) {
		let cluster = self.cluster.clone();
		leader_gated_loop(cluster.clone(), LOAD_DATA_PARTITION_PERIOD, must_exit, move || {
			let cluster = cluster.clone();
			async move { Self::load_data_partitions(&cluster) }
		})
		.await;
	}

	/// Sends a "load" task to every data partition whose last
	/// verification is stale, one per host, fire-and-forget via the
	/// dispatcher's async queue.
	fn load_data_partitions(cluster: &Cluster) {
		let now = cm_util::time::now_msec();
		let due_after = cluster.config.seconds_to_free_data_partition_after_load * 1000;
		for volume in cluster.all_volumes() {
			for dp in volume.data_partitions() {
				if now.saturating_sub(dp.last_load_msec()) < due_after && dp.last_load_msec() != 0 {
					continue;
				}
				for host in dp.hosts() {
					cluster
						.dispatcher
						.add_data_node_tasks(&host, vec![AdminTask::new(OpCode::LoadDataPartition, dp.id, vec![])]);
				}
				dp.record_load(now);
			}
		}
	}

	async fn check_release_data_partitions_loop(self: Arc<Self>, period: Duration, must_exit: watch::Receiver<bool>) {
		let cluster = self.cluster.clone();
		leader_gated_loop(cluster.clone(), period, must_exit, move || {
			let this = self.clone();
			let cluster = cluster.clone();
			async move { this.check_release_data_partitions(&cluster) }
		})
		.await;
	}

	/// Releases the in-memory verification state of partitions loaded
	/// long enough ago, bounded to `numberOfDataPartitionsToFree` per
	/// pass so one sweep never blocks the loop for long.
	fn check_release_data_partitions(&self, cluster: &Cluster) {
		let now = cm_util::time::now_msec();
		let free_after = cluster.config.seconds_to_free_data_partition_after_load * 1000;
		let bound = cluster.config.number_of_data_partitions_to_free;
		let mut released = 0usize;

		'volumes: for volume in cluster.all_volumes() {
			for dp in volume.data_partitions() {
				if released >= bound {
					break 'volumes;
				}
				let last_load = dp.last_load_msec();
				if last_load != 0 && now.saturating_sub(last_load) >= free_after {
					dp.record_load(0);
					released += 1;
				}
			}
		}
		self.data_partitions_released.fetch_add(released as u64, Ordering::SeqCst);
	}

	pub fn data_partitions_released_total(&self) -> u64 {
		self.data_partitions_released.load(Ordering::SeqCst)
	}

	async fn check_heartbeat_data_loop(self: Arc<Self>, period: Duration, must_exit: watch::Receiver<bool>) {
		let cluster = self.cluster.clone();
		leader_gated_loop(cluster.clone(), period, must_exit, move || {
			let cluster = cluster.clone();
			async move { Self::check_heartbeat_data(&cluster).await }
		})
		.await;
	}

	async fn check_heartbeat_data(cluster: &Cluster) {
		let now = cm_util::time::now_msec();
		for node in cluster.registry.all_data_nodes() {
			let task = AdminTask::new(OpCode::HeartbeatData, PartitionId(0), vec![]);
			match cluster.dispatcher.sync_send_admin_task(&node.addr, task).await {
				Ok(reply) => {
					if let Some(telemetry) = reply.telemetry {
						cluster.registry.report_data_node_usage(&node.addr, telemetry.used, telemetry.available + telemetry.used, now);
					}
				}
				Err(e) => warn!("cluster {}: heartbeat to data node {} failed: {}", cluster.name, node.addr, e),
			}
		}
	}

	async fn check_heartbeat_meta_loop(self: Arc<Self>, period: Duration, must_exit: watch::Receiver<bool>) {
		let cluster = self.cluster.clone();
		leader_gated_loop(cluster.clone(), period, must_exit, move || {
			let cluster = cluster.clone();
			async move { Self::check_heartbeat_meta(&cluster).await }
		})
		.await;
	}

	async fn check_heartbeat_meta(cluster: &Cluster) {
		let now = cm_util::time::now_msec();
		for node in cluster.registry.all_meta_nodes() {
			let task = AdminTask::new(OpCode::HeartbeatMeta, PartitionId(0), vec![]);
			match cluster.dispatcher.sync_send_admin_task(&node.addr, task).await {
				Ok(_) => cluster.registry.touch_meta_node(&node.addr, now),
				Err(e) => warn!("cluster {}: heartbeat to meta node {} failed: {}", cluster.name, node.addr, e),
			}
		}
	}

	async fn check_meta_partitions_loop(self: Arc<Self>, period: Duration, must_exit: watch::Receiver<bool>) {
		let cluster = self.cluster.clone();
		leader_gated_loop(cluster.clone(), period, must_exit, move || {
			let cluster = cluster.clone();
			async move { Self::check_meta_partitions(&cluster) }
		})
		.await;
	}

	fn check_meta_partitions(cluster: &Cluster) {
		let now = cm_util::time::now_msec();
		let hb_msec = cluster.config.heartbeat_interval_secs * 1000;
		for volume in cluster.all_volumes() {
			for mp in volume.meta_partitions() {
				let status = mp.check_status(now, hb_msec);
				if status == PartitionStatus::Unavailable {
					warn!(
						"cluster {}: meta partition {} of volume {} dropped below quorum, needs recovery",
						cluster.name, mp.id, volume.name
					);
				}
			}
		}
	}

	async fn check_vol_status_loop(self: Arc<Self>, period: Duration, must_exit: watch::Receiver<bool>) {
		let cluster = self.cluster.clone();
		leader_gated_loop(cluster.clone(), period, must_exit, move || {
			let cluster = cluster.clone();
			async move { Self::check_vol_status(&cluster) }
		})
		.await;
	}

	/// Drives `normal -> markDelete` teardown: once a marked-for-deletion
	/// volume has no more data or meta partitions left, it is safe to
	/// drop from the cluster's volume map entirely.
	fn check_vol_status(cluster: &Cluster) {
		for volume in cluster.all_volumes() {
			if volume.status() != VolumeStatus::MarkDelete {
				continue;
			}
			if volume.data_partitions().is_empty() && volume.meta_partitions().is_empty() {
				cluster.remove_volume(&volume.name);
			}
		}
	}

	async fn check_disk_recovery_progress_loop(self: Arc<Self>, must_exit: watch::Receiver<bool>) {
		let cluster = self.cluster.clone();
		leader_gated_loop(cluster.clone(), DISK_RECOVERY_PERIOD, must_exit, move || {
			let cluster = cluster.clone();
			async move { Self::check_disk_recovery_progress(&cluster) }
		})
		.await;
	}

	/// Advances `BadDataPartitionIds` entries as their replicas heal:
	/// once a bad partition is `ReadWrite` again and no longer
	/// recovering, it is dropped from the index.
	fn check_disk_recovery_progress(cluster: &Cluster) {
		for (key, ids) in cluster.bad_partitions_snapshot() {
			let Some((addr, disk_path)) = key.rsplit_once(':') else { continue };
			for id in ids {
				let recovered = cluster.all_volumes().iter().any(|v| {
					v.data_partition(id)
						.map(|dp| dp.status() == PartitionStatus::ReadWrite && !dp.is_recover())
						.unwrap_or(false)
				});
				if recovered {
					cluster.drop_recovered_partition(&addr.to_string(), disk_path, id);
				}
			}
		}
	}

	async fn check_load_meta_partitions_loop(self: Arc<Self>, must_exit: watch::Receiver<bool>) {
		let cluster = self.cluster.clone();
		leader_gated_loop(cluster.clone(), LOAD_META_PARTITION_PERIOD, must_exit, move || {
			let cluster = cluster.clone();
			async move { Self::check_load_meta_partitions(&cluster).await }
		})
		.await;
	}

	/// Verifies that every meta partition's live replica count still
	/// matches its configured replica count, logging a mismatch for
	/// operator follow-up; unlike `checkMetaPartitions` this loop does
	/// not recompute status, it only cross-checks replica membership.
	async fn check_load_meta_partitions(cluster: &Cluster) {
		for volume in cluster.all_volumes() {
			for mp in volume.meta_partitions() {
				if mp.hosts().len() != volume.mp_replica_num {
					warn!(
						"cluster {}: meta partition {} of volume {} has {} hosts, expected {}",
						cluster.name,
						mp.id,
						volume.name,
						mp.hosts().len(),
						volume.mp_replica_num
					);
				}
			}
		}
	}
}
