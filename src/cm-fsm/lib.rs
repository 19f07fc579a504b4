//! The replicated FSM gateway (§4.G): every mutation to cluster-visible
//! state is encoded as a typed record and submitted as a consensus
//! proposal. The call returns only after the proposal commits and the
//! local apply function has run. This crate treats the consensus engine
//! and the on-disk store as opaque external collaborators, per the
//! out-of-scope boundary in the design.
#[macro_use]
extern crate tracing;

pub mod consensus;
pub mod gateway;
pub mod record;
pub mod store;

pub use consensus::{ConsensusHandle, InMemoryConsensus};
pub use gateway::FsmGateway;
pub use record::{Record, RecordKind};
pub use store::{InMemoryStore, Store};
