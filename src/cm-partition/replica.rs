//! A single replica's last-known state, as reported on heartbeat/load
//! (§4.F, "Responses carry status, replica telemetry").

use serde::{Deserialize, Serialize};

use cm_rpc::Telemetry;
use cm_util::ids::Address;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replica {
	pub addr: Address,
	pub is_leader: bool,
	pub telemetry: Telemetry,
	#[serde(skip, default)]
	pub last_report_msec: u64,
}

impl Replica {
	pub fn new(addr: Address) -> Self {
		Self {
			addr,
			is_leader: false,
			telemetry: Telemetry::default(),
			last_report_msec: cm_util::time::now_msec(),
		}
	}

	pub fn report(&mut self, telemetry: Telemetry, is_leader: bool) {
		self.telemetry = telemetry;
		self.is_leader = is_leader;
		self.last_report_msec = cm_util::time::now_msec();
	}

	pub fn is_fresh(&self, now_msec: u64, heartbeat_interval_msec: u64) -> bool {
		!cm_util::time::is_stale(now_msec, self.last_report_msec, heartbeat_interval_msec)
	}
}
