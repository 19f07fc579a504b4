//! The `Cluster` singleton (§3): every other component hangs off of
//! this one process-wide struct. Lock ordering matches §5 exactly —
//! `vol_mutex` before `dp_mutex` before the registry's own node locks
//! before any per-volume or per-partition lock — callers in this crate
//! must acquire in that order and never reverse it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use cm_fsm::consensus::ConsensusHandle;
use cm_fsm::gateway::FsmGateway;
use cm_partition::Volume;
use cm_registry::NodeRegistry;
use cm_rpc::TaskDispatcher;
use cm_topology::{IdAllocator, Topology};
use cm_util::config::Config;
use cm_util::error::{Error, OkOrNotFound};
use cm_util::ids::{Address, PartitionId};

#[derive(Debug, Clone, Default)]
pub struct LeaderInfo {
	pub leader_id: String,
	pub term: u64,
}

pub struct Cluster {
	pub name: String,
	pub config: Config,
	pub topology: Arc<Topology>,
	pub registry: Arc<NodeRegistry>,
	pub id_allocator: Arc<IdAllocator>,
	pub gateway: Arc<FsmGateway>,
	pub consensus: Arc<dyn ConsensusHandle>,
	pub dispatcher: Arc<TaskDispatcher>,

	// §5, lock #1: guards the volume-name map.
	vol_mutex: RwLock<HashMap<String, Arc<Volume>>>,
	// §5, lock #2: serializes data-partition creation across volumes.
	// Held across proposal/RPC awaits during creation, hence tokio's mutex.
	pub dp_mutex: tokio::sync::Mutex<()>,

	leader_info: RwLock<LeaderInfo>,
	// keyed by "addr:diskPath" per the design's BadDataPartitionIds index.
	bad_partitions: RwLock<HashMap<String, Vec<PartitionId>>>,
	auto_allocate: AtomicBool,
}

impl Cluster {
	pub fn new(
		config: Config,
		topology: Arc<Topology>,
		registry: Arc<NodeRegistry>,
		id_allocator: Arc<IdAllocator>,
		gateway: Arc<FsmGateway>,
		consensus: Arc<dyn ConsensusHandle>,
		dispatcher: Arc<TaskDispatcher>,
	) -> Self {
		let auto_allocate = config.should_auto_allocate;
		let name = config.cluster_name.clone();
		Self {
			name,
			config,
			topology,
			registry,
			id_allocator,
			gateway,
			consensus,
			dispatcher,
			vol_mutex: RwLock::new(HashMap::new()),
			dp_mutex: tokio::sync::Mutex::new(()),
			leader_info: RwLock::new(LeaderInfo::default()),
			bad_partitions: RwLock::new(HashMap::new()),
			auto_allocate: AtomicBool::new(auto_allocate),
		}
	}

	pub fn is_leader(&self) -> bool {
		self.consensus.is_leader()
	}

	pub fn should_auto_allocate(&self) -> bool {
		self.auto_allocate.load(Ordering::SeqCst)
	}

	pub fn set_should_auto_allocate(&self, v: bool) {
		self.auto_allocate.store(v, Ordering::SeqCst);
	}

	pub fn refresh_leader_info(&self) {
		let (leader_id, term) = self.consensus.leader_term();
		*self.leader_info.write().unwrap() = LeaderInfo { leader_id, term };
	}

	pub fn leader_info(&self) -> LeaderInfo {
		self.leader_info.read().unwrap().clone()
	}

	pub fn volume(&self, name: &str) -> Result<Arc<Volume>, Error> {
		self.vol_mutex.read().unwrap().get(name).cloned().ok_or_not_found(format!("volume {}", name))
	}

	pub fn has_volume(&self, name: &str) -> bool {
		self.vol_mutex.read().unwrap().contains_key(name)
	}

	pub fn insert_volume(&self, vol: Arc<Volume>) {
		self.vol_mutex.write().unwrap().insert(vol.name.clone(), vol);
	}

	pub fn remove_volume(&self, name: &str) {
		self.vol_mutex.write().unwrap().remove(name);
	}

	pub fn all_volumes(&self) -> Vec<Arc<Volume>> {
		self.vol_mutex.read().unwrap().values().cloned().collect()
	}

	/// Indexes a newly-degraded replica under `addr:diskPath`, as the
	/// decommission flow's step 7 and the disk-recovery loop require.
	pub fn mark_bad_partition(&self, addr: &Address, disk_path: &str, partition_id: PartitionId) {
		self.bad_partitions
			.write()
			.unwrap()
			.entry(format!("{}:{}", addr, disk_path))
			.or_default()
			.push(partition_id);
	}

	pub fn drop_recovered_partition(&self, addr: &Address, disk_path: &str, partition_id: PartitionId) {
		if let Some(ids) = self.bad_partitions.write().unwrap().get_mut(&format!("{}:{}", addr, disk_path)) {
			ids.retain(|id| *id != partition_id);
		}
	}

	pub fn bad_partitions_snapshot(&self) -> HashMap<String, Vec<PartitionId>> {
		self.bad_partitions.read().unwrap().clone()
	}
}
