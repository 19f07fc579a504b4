//! Library surface for the cluster master: the `Cluster` singleton,
//! the lifecycle orchestrator, placement glue, and the reconciler
//! scheduler (§4.H, §4.I). The `cm-master` binary (`main.rs`) is a
//! thin bootstrap over this crate; integration tests build a `Cluster`
//! the same way `main.rs` does, against the in-memory store/consensus/
//! connection-pool stand-ins this workspace ships.
#[macro_use]
extern crate tracing;

pub mod cluster;
pub mod orchestrator;
pub mod placement;
pub mod reconciler;
