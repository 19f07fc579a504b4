//! Task dispatcher (§4.F): the binary admin-task envelope sent to
//! remote data/meta nodes, a per-node connection pool abstraction, and
//! the task manager that either sends synchronously (create/decommission,
//! where the orchestrator needs the ack before continuing) or enqueues
//! for asynchronous fan-out (heartbeat, load).
#[macro_use]
extern crate tracing;

pub mod dispatcher;
pub mod pool;
pub mod task;

pub use dispatcher::TaskDispatcher;
pub use pool::{Connection, ConnectionPool};
pub use task::{AdminTask, AdminTaskReply, OpCode, Telemetry};
