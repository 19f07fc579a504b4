//! Cluster master entry point. Parses the config path from the command
//! line, builds the single-node demo stack (in-memory store, in-memory
//! consensus, loopback connection pool — the real transport and
//! replicated-log engine are out of scope, per the design), wires the
//! id allocator into the FSM's apply path, and runs the reconciler
//! scheduler until asked to shut down.
#[macro_use]
extern crate tracing;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use structopt::StructOpt;
use tokio::sync::watch;

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
use cm_util::config::Config;

const ADMIN_TASK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(StructOpt, Debug)]
#[structopt(name = "cm-master")]
struct Opt {
	/// Path to the cluster master's TOML configuration file
	#[structopt(short, long, default_value = "cm-master.toml")]
	config: PathBuf,
}

#[tokio::main]
async fn main() {
	let opt = Opt::from_args();

	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.init();

	let config = match Config::load(&opt.config) {
		Ok(c) => c,
		Err(e) => {
			eprintln!("failed to load config from {}: {}", opt.config.display(), e);
			std::process::exit(1);
		}
	};

	info!("cluster master {} starting, version {}", config.cluster_name, git_version::git_version!(fallback = "unknown"));

	let cluster = build_cluster(config);
	let orchestrator = Arc::new(LifecycleOrchestrator::new(cluster.clone()));
	let reconciler = Reconciler::new(cluster.clone(), orchestrator);

	let (must_exit_tx, must_exit_rx) = watch::channel(false);
	let reconciler_task = tokio::spawn(reconciler.run(must_exit_rx));

	wait_for_shutdown_signal().await;
	info!("cluster master {} shutting down", cluster.name);
	let _ = must_exit_tx.send(true);
	let _ = reconciler_task.await;
}

fn build_cluster(config: Config) -> Arc<Cluster> {
	let store = Arc::new(InMemoryStore::new());
	let consensus = InMemoryConsensus::new(config.rpc_bind_addr.clone(), store.clone());
	let gateway = Arc::new(FsmGateway::new(consensus.clone(), store.clone()));

	let topology = Arc::new(Topology::new());
	let id_allocator = Arc::new(IdAllocator::new(gateway.clone()));
	if let Err(e) = id_allocator.recover(store.as_ref()) {
		warn!("failed to recover id allocator state: {}", e);
	}

	let registry = Arc::new(NodeRegistry::new(topology.clone(), gateway.clone(), config.node_set_capacity));
	let pool = Arc::new(LoopbackConnectionPool::new());
	let dispatcher = Arc::new(TaskDispatcher::new(pool, ADMIN_TASK_TIMEOUT));

	let cluster = Arc::new(Cluster::new(config, topology, registry, id_allocator.clone(), gateway.clone(), consensus, dispatcher));
	cluster.refresh_leader_info();

	gateway.register_apply(Box::new(move |record| id_allocator.apply(record)));

	cluster
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
	use tokio::signal::unix::{signal, SignalKind};
	let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
	tokio::select! {
		_ = tokio::signal::ctrl_c() => {},
		_ = term.recv() => {},
	}
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
	let _ = tokio::signal::ctrl_c().await;
}
