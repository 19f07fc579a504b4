//! Topology (§4.B) and id allocation (§4.A). The carry-weight placement
//! algorithm lives here as a pure function over generic candidates so
//! this crate does not need to depend on the node registry crate; the
//! orchestrator zips registry capacity data with topology membership
//! before calling it.

pub mod carry;
pub mod id_allocator;
pub mod topology;

pub use carry::{carry_select, CarryNode};
pub use id_allocator::IdAllocator;
pub use topology::{DataPlacement, Rack, RackAllocation, Topology};
