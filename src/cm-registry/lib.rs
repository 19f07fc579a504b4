//! Node registry (§4.C): concurrent address-keyed data/meta node maps,
//! liveness, and the idempotent registration path that chains the
//! topology (B), id allocator (A) and FSM gateway (G) together.
#[macro_use]
extern crate tracing;

pub mod node;
pub mod registry;

pub use node::{DataNode, MetaNode};
pub use registry::NodeRegistry;
