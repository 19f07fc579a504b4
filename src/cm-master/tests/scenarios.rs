//! End-to-end scenario tests (S1-S6): build a single-node cluster out
//! of the same in-memory stand-ins `main.rs` wires up for the demo
//! binary, drive it through the public `Cluster`/`LifecycleOrchestrator`/
//! `Reconciler` surface, and assert the literal expectations from the
//! design's scenario list.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cm_fsm::consensus::InMemoryConsensus;
use cm_fsm::gateway::FsmGateway;
use cm_fsm::store::InMemoryStore;
use cm_master::cluster::Cluster;
use cm_master::orchestrator::LifecycleOrchestrator;
use cm_master::reconciler::Reconciler;
use cm_registry::NodeRegistry;
use cm_rpc::pool::LoopbackConnectionPool;
use cm_rpc::TaskDispatcher;
use cm_topology::{IdAllocator, Topology};
use cm_util::error::Error;
use cm_util::config::Config;

fn test_config(node_set_capacity: usize, should_auto_allocate: bool) -> Config {
	Config {
		cluster_name: "test-cluster".to_string(),
		metadata_dir: PathBuf::from("/tmp/cm-master-scenarios"),
		rpc_bind_addr: "127.0.0.1:0".to_string(),
		heartbeat_interval_secs: 10,
		interval_to_check_data_partition_secs: 60,
		interval_to_free_data_partition_secs: 600,
		number_of_data_partitions_to_free: 10,
		seconds_to_free_data_partition_after_load: 300,
		node_set_capacity,
		default_init_data_partition_cnt: 10,
		retain_logs: 20_000,
		should_auto_allocate,
		addr_database: HashMap::new(),
	}
}

/// Builds a single-node cluster against the in-memory store, in-memory
/// consensus and loopback connection pool, exactly as `main.rs::build_cluster`
/// wires up the demo binary. Returns the concrete `InMemoryConsensus`
/// handle alongside the cluster so tests can reach its `reject_next_proposal`/
/// `set_leader` test hooks, which aren't part of the `ConsensusHandle` trait object.
fn build_test_cluster(node_set_capacity: usize, should_auto_allocate: bool) -> (Arc<Cluster>, Arc<InMemoryConsensus>) {
	let config = test_config(node_set_capacity, should_auto_allocate);
	let store = Arc::new(InMemoryStore::new());
	let consensus = InMemoryConsensus::new(config.rpc_bind_addr.clone(), store.clone());
	let gateway = Arc::new(FsmGateway::new(consensus.clone(), store.clone()));

	let topology = Arc::new(Topology::new());
	let id_allocator = Arc::new(IdAllocator::new(gateway.clone()));

	let registry = Arc::new(NodeRegistry::new(topology.clone(), gateway.clone(), config.node_set_capacity));
	let pool = Arc::new(LoopbackConnectionPool::new());
	let dispatcher = Arc::new(TaskDispatcher::new(pool, Duration::from_secs(5)));

	let cluster = Arc::new(Cluster::new(config, topology, registry, id_allocator.clone(), gateway.clone(), consensus.clone(), dispatcher));
	cluster.refresh_leader_info();
	gateway.register_apply(Box::new(move |record| id_allocator.apply(record)));
	(cluster, consensus)
}

/// Registers `count` data nodes in `rack`, returning their addresses.
async fn register_data_nodes(cluster: &Cluster, rack: &str, count: usize, prefix: &str) -> Vec<String> {
	let mut addrs = Vec::new();
	for i in 0..count {
		let addr = format!("{}-{}:6000", prefix, i);
		cluster.registry.add_data_node(&addr, rack, &cluster.id_allocator).await.unwrap();
		addrs.push(addr);
	}
	addrs
}

async fn register_meta_nodes(cluster: &Cluster, count: usize, prefix: &str) -> Vec<String> {
	let mut addrs = Vec::new();
	for i in 0..count {
		let addr = format!("{}-{}:7000", prefix, i);
		cluster.registry.add_meta_node(&addr, "meta-rack", &cluster.id_allocator).await.unwrap();
		addrs.push(addr);
	}
	addrs
}

/// S1: a fresh 2-rack, 6-data-node / 3-meta-node cluster; `createVol`
/// produces 3 meta partitions covering `[0, +inf)`, 10 rack-diverse
/// 3-host data partitions, and a `normal` volume.
#[tokio::test]
async fn s1_create_volume() {
	let (cluster, _consensus) = build_test_cluster(18, false);
	register_data_nodes(&cluster, "r1", 3, "dn-r1").await;
	register_data_nodes(&cluster, "r2", 3, "dn-r2").await;
	register_meta_nodes(&cluster, 3, "mn").await;

	let orchestrator = LifecycleOrchestrator::new(cluster.clone());
	let volume = orchestrator.create_vol("v1", 3, 3, false, 0, 100 << 30).await.unwrap();

	assert_eq!(volume.status(), cm_partition::VolumeStatus::Normal);

	let mps = volume.meta_partitions();
	assert_eq!(mps.len(), 3);
	assert_eq!(mps[0].range().0, 0);
	assert!(mps.last().unwrap().range().1.is_none(), "last meta partition must stay open-ended");
	// ranges chain: each range's start is the previous range's end + 1.
	for pair in mps.windows(2) {
		let prev_end = pair[0].range().1.unwrap();
		assert_eq!(pair[1].range().0, prev_end + 1);
	}

	let dps = volume.data_partitions();
	assert_eq!(dps.len(), 10);
	for dp in &dps {
		assert_eq!(dp.hosts().len(), 3);
		let racks: Vec<String> = dp.hosts().iter().map(|h| cluster.registry.data_node(h).unwrap().rack).collect();
		assert!(
			!racks.iter().all(|r| r == &racks[0]),
			"data partition {} has all hosts in rack {}, expected a 2/1 split across racks",
			dp.id,
			racks[0]
		);
		for host in dp.hosts() {
			assert!(cluster.registry.data_node(&host).is_ok(), "host {} must resolve to a registered node", host);
		}
	}
}

/// S2: decommissioning a data node replaces every data partition it
/// hosted with a fresh replica elsewhere, preserving replica count and
/// marking the partition recovering, and indexes the dead host under
/// `badPartitions`.
#[tokio::test]
async fn s2_decommission_data_node() {
	let (cluster, _consensus) = build_test_cluster(18, false);
	register_data_nodes(&cluster, "r1", 3, "dn-r1").await;
	register_data_nodes(&cluster, "r2", 3, "dn-r2").await;
	register_meta_nodes(&cluster, 3, "mn").await;

	let orchestrator = LifecycleOrchestrator::new(cluster.clone());
	let volume = orchestrator.create_vol("v1", 3, 3, false, 0, 100 << 30).await.unwrap();

	// Pick a node that hosts at least one DP (with 10 DPs over 6 hosts,
	// every host hosts several).
	let target = volume
		.data_partitions()
		.iter()
		.flat_map(|dp| dp.hosts())
		.next()
		.expect("at least one host");
	let affected: Vec<_> = volume.data_partitions().into_iter().filter(|dp| dp.hosts().contains(&target)).collect();
	assert!(!affected.is_empty());

	orchestrator.data_node_off_line(&target).await.unwrap();

	for dp in &affected {
		assert_eq!(dp.hosts().len(), 3, "replica count must be preserved after decommission");
		assert!(!dp.hosts().contains(&target), "the decommissioned host must be gone from hosts");
		assert_eq!(dp.status(), cm_partition::PartitionStatus::ReadOnly);
		assert!(dp.is_recover());
	}

	let bad = cluster.bad_partitions_snapshot();
	let entry = bad.iter().find(|(k, _)| k.starts_with(&format!("{}:", target))).map(|(_, v)| v.clone());
	let entry = entry.expect("decommissioned host must have a badPartitions entry");
	for dp in &affected {
		assert!(entry.contains(&dp.id), "badPartitions entry must list dp {}", dp.id);
	}

	assert!(cluster.registry.data_node(&target).is_err(), "node must be removed from the registry");
}

/// S3: a consensus rejection during `createDataPartition` surfaces
/// `ProposalFailed`, leaves the volume's partition count unchanged, and
/// a subsequent attempt succeeds without colliding with a half-created
/// record (the id allocator never commits a counter bump for a proposal
/// that didn't commit, so no id is ever leaked or reused unsafely).
#[tokio::test]
async fn s3_leader_handover_mid_create() {
	let (cluster, consensus) = build_test_cluster(18, false);
	register_data_nodes(&cluster, "r1", 2, "dn-r1").await;
	register_data_nodes(&cluster, "r2", 1, "dn-r2").await;
	register_meta_nodes(&cluster, 3, "mn").await;

	let orchestrator = LifecycleOrchestrator::new(cluster.clone());
	let volume = orchestrator.create_vol("v1", 3, 3, false, 0, 100 << 30).await.unwrap();
	let before = volume.data_partitions().len();

	consensus.reject_next_proposal();

	let err = orchestrator.create_data_partition("v1").await.unwrap_err();
	assert!(matches!(err, Error::ProposalFailed(_)), "expected ProposalFailed, got {:?}", err);
	assert_eq!(volume.data_partitions().len(), before, "a rejected proposal must not grow the volume's partition count");

	// A fresh leader resumes and the next attempt succeeds cleanly.
	let dp = orchestrator.create_data_partition("v1").await.unwrap();
	assert_eq!(dp.hosts().len(), 3);
	assert_eq!(volume.data_partitions().len(), before + 1);
}

/// S4: with auto-allocation enabled, once a volume's writable data
/// partition count drops under the configured threshold, the
/// reconciler's fill pass restores it.
#[tokio::test]
async fn s4_auto_creation_restores_writable_count() {
	let (cluster, _consensus) = build_test_cluster(18, true);
	register_data_nodes(&cluster, "r1", 3, "dn-r1").await;
	register_data_nodes(&cluster, "r2", 3, "dn-r2").await;
	register_meta_nodes(&cluster, 3, "mn").await;

	let orchestrator = Arc::new(LifecycleOrchestrator::new(cluster.clone()));
	let volume = orchestrator.create_vol("v1", 3, 3, false, 0, 100 << 30).await.unwrap();
	assert_eq!(volume.data_partitions().len(), 10);

	// "Kill" 8 of the 10 DPs: drop them straight to Unavailable so only
	// 2 remain read-write, mirroring the scenario's "writable count = 2".
	let dps = volume.data_partitions();
	for dp in dps.iter().take(8) {
		volume.remove_data_partition(dp.id);
	}
	assert_eq!(volume.data_partitions().len(), 2);

	let reconciler = Reconciler::new(cluster.clone(), orchestrator.clone());
	reconciler.fill_volumes_under_threshold().await;

	assert!(
		volume.data_partitions().len() >= cluster.config.default_init_data_partition_cnt,
		"auto-creation must restore at least the default init count, got {}",
		volume.data_partitions().len()
	);
}

/// S5: with `nodeSetCapacity=4`, the fifth registered data node spills
/// into a freshly created node-set.
#[tokio::test]
async fn s5_node_set_capacity_spills_over() {
	let (cluster, _consensus) = build_test_cluster(4, false);
	let addrs = register_data_nodes(&cluster, "r1", 5, "dn").await;

	let mut by_set: HashMap<cm_util::ids::NodeSetId, usize> = HashMap::new();
	for addr in &addrs {
		let node = cluster.registry.data_node(addr).unwrap();
		*by_set.entry(node.node_set_id).or_insert(0) += 1;
	}

	assert_eq!(by_set.len(), 2, "the fifth node must land in a second node-set");
	let counts: Vec<usize> = by_set.values().copied().collect();
	assert!(counts.contains(&4), "first node-set must be full at capacity");
	assert!(counts.contains(&1), "second node-set must hold the overflow node");
}

/// S6: splitting a meta partition's inode range at `new_start` closes
/// the tail's end bound and creates a fresh sibling covering
/// `(new_start, +inf)`; a second split below the observed max is rejected.
#[tokio::test]
async fn s6_inode_range_split() {
	let (cluster, _consensus) = build_test_cluster(18, false);
	register_data_nodes(&cluster, "r1", 3, "dn-r1").await;
	register_data_nodes(&cluster, "r2", 3, "dn-r2").await;
	register_meta_nodes(&cluster, 3, "mn").await;

	let orchestrator = LifecycleOrchestrator::new(cluster.clone());
	let volume = orchestrator.create_vol("v1", 3, 3, false, 0, 100 << 30).await.unwrap();

	let tail = volume.open_ended_meta_partition().unwrap();
	let leader_host = tail.hosts()[0].clone();
	let mut telemetry = cm_rpc::Telemetry::default();
	telemetry.max_inode_id = Some(10_000);
	tail.report_replica(&leader_host, telemetry, true);
	assert_eq!(tail.max_node_id(), 10_000);

	let new_tail = orchestrator.update_inode_id_range("v1", 10_001).await.unwrap();

	assert_eq!(tail.range().1, Some(10_001), "the split partition's end bound must close at the new start");
	assert_eq!(new_tail.range(), (10_001, None), "the new sibling must cover (new_start, +inf)");
	assert_eq!(new_tail.hosts().len(), volume.mp_replica_num);
	assert!(volume.meta_partitions().iter().any(|mp| mp.id == new_tail.id));

	let err = orchestrator.update_inode_id_range("v1", 9_000).await.unwrap_err();
	assert!(matches!(err, Error::InvalidArgument(_)));
}
