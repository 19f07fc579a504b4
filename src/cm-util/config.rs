//! Process configuration, loaded from a TOML file the way
//! `garage_util::config` loads Garage's `garage.toml`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Error;

fn default_heartbeat_interval() -> u64 {
	10
}
fn default_interval_to_check_dp() -> u64 {
	60
}
fn default_interval_to_free_dp() -> u64 {
	600
}
fn default_number_of_dp_to_free() -> usize {
	10
}
fn default_seconds_to_free_dp_after_load() -> u64 {
	5 * 60
}
fn default_node_set_capacity() -> usize {
	18
}
fn default_init_data_partition_cnt() -> usize {
	10
}
fn default_retain_logs() -> u64 {
	20000
}

/// Top-level configuration for a cluster master process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
	/// Human readable cluster name, used to tag alert messages
	pub cluster_name: String,

	/// Directory in which the local replicated-log store and id
	/// allocator snapshots are kept
	pub metadata_dir: PathBuf,

	/// Address this node listens for admin-task and peer RPCs on
	pub rpc_bind_addr: String,

	/// Period between heartbeat fan-outs to data/meta nodes, and
	/// between reconciler wake-ups that are keyed off it
	#[serde(default = "default_heartbeat_interval")]
	pub heartbeat_interval_secs: u64,

	/// Period of the `checkDataPartitions`/`checkMetaPartitions`/
	/// `checkVolStatus` reconciler loops
	#[serde(default = "default_interval_to_check_dp")]
	pub interval_to_check_data_partition_secs: u64,

	/// Period of the `checkReleaseDataPartitions` loop
	#[serde(default = "default_interval_to_free_dp")]
	pub interval_to_free_data_partition_secs: u64,

	/// Upper bound on partitions released per `checkReleaseDataPartitions` pass
	#[serde(default = "default_number_of_dp_to_free")]
	pub number_of_data_partitions_to_free: usize,

	/// Grace period after a load task before a partition becomes eligible
	/// for release again
	#[serde(default = "default_seconds_to_free_dp_after_load")]
	pub seconds_to_free_data_partition_after_load: u64,

	/// Maximum number of nodes placed into a single node-set
	#[serde(default = "default_node_set_capacity")]
	pub node_set_capacity: usize,

	/// Number of data partitions a freshly created volume is initialized with
	#[serde(default = "default_init_data_partition_cnt")]
	pub default_init_data_partition_cnt: usize,

	/// Number of consensus log entries retained before compaction
	#[serde(default = "default_retain_logs")]
	pub retain_logs: u64,

	/// Whether the auto-creation reconciler is allowed to act by default
	/// on newly created volumes
	#[serde(default)]
	pub should_auto_allocate: bool,

	/// Static map of leaderId -> advertised address, consulted by clients
	/// that need to find the current leader without asking the consensus
	/// layer directly
	#[serde(default)]
	pub addr_database: HashMap<String, String>,
}

impl Config {
	pub fn load(path: impl AsRef<Path>) -> Result<Config, Error> {
		let data = std::fs::read_to_string(path.as_ref())?;
		let config: Config = toml::from_str(&data)?;
		Ok(config)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn defaults_fill_in() {
		let toml = r#"
			cluster_name = "test-cluster"
			metadata_dir = "/tmp/cm"
			rpc_bind_addr = "0.0.0.0:4000"
		"#;
		let config: Config = toml::from_str(toml).unwrap();
		assert_eq!(config.heartbeat_interval_secs, 10);
		assert_eq!(config.default_init_data_partition_cnt, 10);
		assert!(!config.should_auto_allocate);
	}
}
