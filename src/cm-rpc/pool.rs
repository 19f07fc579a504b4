//! Connection abstraction (§4.F, "Connection lifecycle") and an
//! in-memory stand-in used for tests and single-node demo mode. The
//! real transport to data/meta nodes is an external collaborator, out
//! of scope here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use cm_util::error::Error;
use cm_util::ids::Address;

use crate::task::{AdminTask, AdminTaskReply};

#[async_trait]
pub trait Connection: Send + Sync {
	async fn send(&self, task: &AdminTask) -> Result<AdminTaskReply, Error>;
}

#[async_trait]
pub trait ConnectionPool: Send + Sync {
	/// Returns an idle connection from the pool, or dials a fresh one.
	async fn get(&self, addr: &Address) -> Result<Arc<dyn Connection>, Error>;

	/// Returns a connection to the pool unless `force_close`, in which
	/// case it is dropped. Must be called exactly once per successful
	/// `get`; on a send error the caller drops the connection instead.
	fn put(&self, addr: &Address, conn: Arc<dyn Connection>, force_close: bool);
}

/// Always answers `AdminTaskReply::ok(None)` without touching a
/// network. Used by tests and by the single-node demo binary, where
/// there is no real data/meta node to dial.
pub struct LoopbackConnection;

#[async_trait]
impl Connection for LoopbackConnection {
	async fn send(&self, _task: &AdminTask) -> Result<AdminTaskReply, Error> {
		Ok(AdminTaskReply::ok(None))
	}
}

/// Single idle connection per address; `get` dials (constructs) one
/// lazily, `put` keeps at most one idle connection around.
pub struct LoopbackConnectionPool {
	idle: Mutex<HashMap<Address, Arc<dyn Connection>>>,
}

impl LoopbackConnectionPool {
	pub fn new() -> Self {
		Self { idle: Mutex::new(HashMap::new()) }
	}
}

impl Default for LoopbackConnectionPool {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl ConnectionPool for LoopbackConnectionPool {
	async fn get(&self, addr: &Address) -> Result<Arc<dyn Connection>, Error> {
		if let Some(conn) = self.idle.lock().unwrap().remove(addr) {
			return Ok(conn);
		}
		Ok(Arc::new(LoopbackConnection))
	}

	fn put(&self, addr: &Address, conn: Arc<dyn Connection>, force_close: bool) {
		if !force_close {
			self.idle.lock().unwrap().insert(addr.clone(), conn);
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use cm_util::ids::PartitionId;
	use crate::task::OpCode;

	#[tokio::test]
	async fn put_without_force_close_is_reused() {
		let pool = LoopbackConnectionPool::new();
		let addr = "10.0.0.1:6000".to_string();
		let conn = pool.get(&addr).await.unwrap();
		pool.put(&addr, conn, false);
		assert!(pool.idle.lock().unwrap().contains_key(&addr));
	}

	#[tokio::test]
	async fn force_close_drops_the_connection() {
		let pool = LoopbackConnectionPool::new();
		let addr = "10.0.0.1:6000".to_string();
		let conn = pool.get(&addr).await.unwrap();
		pool.put(&addr, conn, true);
		assert!(!pool.idle.lock().unwrap().contains_key(&addr));
	}

	#[tokio::test]
	async fn loopback_connection_answers_ok() {
		let conn = LoopbackConnection;
		let reply = conn
			.send(&AdminTask::new(OpCode::HeartbeatData, PartitionId(1), vec![]))
			.await
			.unwrap();
		assert!(reply.ok);
	}
}
