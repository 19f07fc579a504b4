//! The replicated log interface (§6, "Replicated log interface
//! (consumed)"): `Submit`, `IsLeader`, `LeaderTerm`, `RegisterApply`.
//! The core treats this as an opaque "propose + apply" interface; this
//! crate ships only a single-node in-memory stand-in, used for tests and
//! for running a one-node cluster. It is not a real consensus protocol.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use cm_util::error::Error;

use crate::record::Record;
use crate::store::Store;

pub type ApplyFn = dyn Fn(&Record) + Send + Sync;

#[async_trait]
pub trait ConsensusHandle: Send + Sync {
	/// Submit a record as a consensus proposal. Returns only once the
	/// proposal has committed and been applied locally.
	async fn submit(&self, record: Record) -> Result<(), Error>;

	/// Whether this node currently holds consensus leadership.
	fn is_leader(&self) -> bool;

	/// Current leader id and term, for diagnostics and the `AddrDatabase`
	/// lookup described in §6.
	fn leader_term(&self) -> (String, u64);

	/// Register the function invoked on every applied record, on every
	/// replica (§4.G, "Apply on any replica deterministically mutates
	/// in-memory state from the bytes").
	fn register_apply(&self, f: Box<ApplyFn>);
}

/// Single-node stand-in for the real consensus engine. Every submitted
/// record is immediately "committed" and applied, and this node is
/// always leader unless explicitly demoted with [`InMemoryConsensus::set_leader`].
pub struct InMemoryConsensus {
	node_id: String,
	term: AtomicU64,
	is_leader: AtomicBool,
	reject_next: AtomicBool,
	apply_fn: RwLock<Option<Box<ApplyFn>>>,
	store: Arc<dyn Store>,
}

impl InMemoryConsensus {
	pub fn new(node_id: impl Into<String>, store: Arc<dyn Store>) -> Arc<Self> {
		Arc::new(Self {
			node_id: node_id.into(),
			term: AtomicU64::new(1),
			is_leader: AtomicBool::new(true),
			reject_next: AtomicBool::new(false),
			apply_fn: RwLock::new(None),
			store,
		})
	}

	/// Test/ops hook simulating a leader handover.
	pub fn set_leader(&self, leader: bool) {
		self.is_leader.store(leader, Ordering::SeqCst);
		if !leader {
			self.term.fetch_add(1, Ordering::SeqCst);
		}
	}

	/// Test hook simulating a single proposal timing out or being
	/// rejected, used to exercise the `ProposalFailed` rollback path
	/// (scenario S3).
	pub fn reject_next_proposal(&self) {
		self.reject_next.store(true, Ordering::SeqCst);
	}
}

#[async_trait]
impl ConsensusHandle for InMemoryConsensus {
	async fn submit(&self, record: Record) -> Result<(), Error> {
		if !self.is_leader.load(Ordering::SeqCst) {
			return Err(Error::NotLeader);
		}
		if self.reject_next.swap(false, Ordering::SeqCst) {
			return Err(Error::ProposalFailed(format!(
				"simulated rejection of proposal for {}",
				record.store_key()
			)));
		}

		if record.is_delete() {
			self.store.delete(&record.store_key())?;
		} else {
			self.store.put(&record.store_key(), &record.value)?;
		}

		if let Some(f) = self.apply_fn.read().unwrap().as_ref() {
			f(&record);
		}

		Ok(())
	}

	fn is_leader(&self) -> bool {
		self.is_leader.load(Ordering::SeqCst)
	}

	fn leader_term(&self) -> (String, u64) {
		(self.node_id.clone(), self.term.load(Ordering::SeqCst))
	}

	fn register_apply(&self, f: Box<ApplyFn>) {
		*self.apply_fn.write().unwrap() = Some(f);
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::record::RecordKind;
	use crate::store::InMemoryStore;
	use std::sync::atomic::AtomicUsize;

	#[tokio::test]
	async fn submit_commits_and_applies() {
		let consensus = InMemoryConsensus::new("n1", Arc::new(InMemoryStore::new()));
		let applied = Arc::new(AtomicUsize::new(0));
		let applied2 = applied.clone();
		consensus.register_apply(Box::new(move |_r| {
			applied2.fetch_add(1, Ordering::SeqCst);
		}));

		consensus
			.submit(Record::new(RecordKind::AddVol, "v1", b"{}".to_vec()))
			.await
			.unwrap();
		assert_eq!(applied.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn demoted_leader_rejects_submit() {
		let consensus = InMemoryConsensus::new("n1", Arc::new(InMemoryStore::new()));
		consensus.set_leader(false);
		let err = consensus
			.submit(Record::new(RecordKind::AddVol, "v1", vec![]))
			.await
			.unwrap_err();
		assert!(matches!(err, Error::NotLeader));
	}

	#[tokio::test]
	async fn rejected_proposal_does_not_apply() {
		let consensus = InMemoryConsensus::new("n1", Arc::new(InMemoryStore::new()));
		let applied = Arc::new(AtomicUsize::new(0));
		let applied2 = applied.clone();
		consensus.register_apply(Box::new(move |_r| {
			applied2.fetch_add(1, Ordering::SeqCst);
		}));
		consensus.reject_next_proposal();

		let err = consensus
			.submit(Record::new(RecordKind::AddVol, "v1", vec![]))
			.await
			.unwrap_err();
		assert!(matches!(err, Error::ProposalFailed(_)));
		assert_eq!(applied.load(Ordering::SeqCst), 0);
	}
}
