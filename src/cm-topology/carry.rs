//! Carry-weight placement selection (§4.B, §9 design note). Kept
//! decoupled from both the topology and the node registry: it operates
//! on a small generic candidate struct so this crate never needs to
//! depend on the registry crate. The orchestrator assembles
//! `CarryNode`s by zipping a node-set's member addresses (from
//! [`crate::topology::Topology`]) with capacity/used figures (from the
//! registry) before calling [`carry_select`].

use cm_util::ids::Address;

/// One candidate under consideration for placement, carrying enough of
/// a data/meta node's state to compute its carry weight.
#[derive(Debug, Clone)]
pub struct CarryNode {
	pub addr: Address,
	/// Total usable capacity, in bytes.
	pub total: u64,
	/// Capacity already committed to existing partitions, in bytes.
	pub used: u64,
	/// Accumulated carry weight, in `[0, 1)` once normalized; callers
	/// seed this from the last round's leftover fraction and
	/// `carry_select` returns updated carries for the next round.
	pub carry: f64,
}

impl CarryNode {
	/// Fraction of capacity still free, `0.0` for a node reporting no
	/// capacity at all (treated as fully loaded rather than divide-by-zero).
	pub fn free_ratio(&self) -> f64 {
		if self.total == 0 {
			return 0.0;
		}
		1.0 - (self.used as f64 / self.total as f64)
	}
}

/// Deterministically selects `count` distinct nodes out of `candidates`
/// by carry weight (highest first), falling back to ascending address
/// order to break exact ties so that replicas of the same placement
/// request are reproducible across leader replays.
///
/// A node's carry weight is its incoming `carry` plus its current free
/// ratio; this mirrors the classic "carry" load-balancing scheme where
/// every round a node's weight grows by its free ratio until it is
/// picked, at which point its weight resets to the remainder.
///
/// Returns the selected addresses together with each selected node's
/// residual carry for the next round (`weight - 1.0`), in the same
/// order as the input `candidates` restricted to the selection.
/// Returns [`cm_util::error::Error::NoResource`] if fewer than `count`
/// candidates are available at all (before weighing).
pub fn carry_select(candidates: &[CarryNode], count: usize) -> Result<Vec<(Address, f64)>, cm_util::error::Error> {
	if candidates.len() < count {
		return Err(cm_util::error::Error::NoResource(format!(
			"need {} nodes, only {} available",
			count,
			candidates.len()
		)));
	}

	let mut weighed: Vec<(usize, f64)> = candidates
		.iter()
		.enumerate()
		.map(|(i, n)| (i, n.carry + n.free_ratio()))
		.collect();

	weighed.sort_by(|a, b| {
		b.1.partial_cmp(&a.1)
			.unwrap_or(std::cmp::Ordering::Equal)
			.then_with(|| candidates[a.0].addr.cmp(&candidates[b.0].addr))
	});

	Ok(weighed
		.into_iter()
		.take(count)
		.map(|(i, weight)| (candidates[i].addr.clone(), weight - 1.0))
		.collect())
}


#[cfg(test)]
mod proptests {
	use super::*;
	use proptest::prelude::*;

	fn arb_candidates(max_len: usize) -> impl Strategy<Value = Vec<CarryNode>> {
		proptest::collection::vec((1u64..10_000, 0u64..10_000), 1..max_len).prop_map(|pairs| {
			pairs
				.into_iter()
				.enumerate()
				.map(|(i, (total, used_raw))| CarryNode {
					addr: format!("node-{:04}", i),
					total,
					used: used_raw % total.max(1),
					carry: 0.0,
				})
				.collect()
		})
	}

	proptest! {
		/// `carry_select` is a deterministic function of its input: calling
		/// it twice on the same candidates picks the same addresses.
		#[test]
		fn selection_is_deterministic(candidates in arb_candidates(20)) {
			let count = (candidates.len() / 2).max(1);
			let first = carry_select(&candidates, count);
			let second = carry_select(&candidates, count);
			prop_assert_eq!(first.map(|v| v.into_iter().map(|(a, _)| a).collect::<Vec<_>>()),
				second.map(|v| v.into_iter().map(|(a, _)| a).collect::<Vec<_>>()));
		}

		/// Every selection returns distinct addresses, never the same node twice.
		#[test]
		fn selection_never_duplicates(candidates in arb_candidates(20)) {
			let count = (candidates.len() / 2).max(1);
			if let Ok(picked) = carry_select(&candidates, count) {
				let mut addrs: Vec<_> = picked.iter().map(|(a, _)| a.clone()).collect();
				let before = addrs.len();
				addrs.sort();
				addrs.dedup();
				prop_assert_eq!(addrs.len(), before);
			}
		}
	}
}
