//! Time helpers, mirroring `garage_util::time`'s `now_msec`.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_msec() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("system clock is before the Unix epoch")
		.as_millis() as u64
}

/// True if `last_report` is stale relative to `now` given a heartbeat
/// interval, i.e. `now - last_report >= 2 * heartbeat_interval`.
pub fn is_stale(now_msec: u64, last_report_msec: u64, heartbeat_interval_msec: u64) -> bool {
	now_msec.saturating_sub(last_report_msec) >= 2 * heartbeat_interval_msec
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn staleness() {
		assert!(!is_stale(1000, 990, 100));
		assert!(is_stale(1300, 1000, 100));
	}
}
