//! Per-node task managers and the dispatcher that owns all of them
//! (§4.F). Synchronous sends are used by the orchestrator during
//! create/decommission, where the caller needs the ack before
//! continuing; everything else goes through the per-node queue and is
//! drained best-effort by a background task.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;

use cm_util::error::Error;
use cm_util::ids::Address;

use crate::pool::ConnectionPool;
use crate::task::{AdminTask, AdminTaskReply};

/// `Get` + bounded-timeout send + `Put`, in one call. The connection is
/// returned to the pool only on success; on any send error the caller
/// must not return it (§5, "Shared resource policy").
pub async fn sync_send_admin_task(
	task: &AdminTask,
	pool: &dyn ConnectionPool,
	addr: &Address,
	timeout: Duration,
) -> Result<AdminTaskReply, Error> {
	let conn = pool.get(addr).await?;
	match tokio::time::timeout(timeout, conn.send(task)).await {
		Ok(Ok(reply)) => {
			pool.put(addr, conn, false);
			Ok(reply)
		}
		Ok(Err(e)) => Err(e),
		Err(_) => Err(Error::Timeout(format!("admin task to {} timed out", addr))),
	}
}

struct TaskManager {
	addr: Address,
	tx: mpsc::UnboundedSender<AdminTask>,
}

impl TaskManager {
	fn new(addr: Address, pool: Arc<dyn ConnectionPool>, timeout: Duration) -> Self {
		let (tx, mut rx) = mpsc::unbounded_channel::<AdminTask>();
		let loop_addr = addr.clone();
		tokio::spawn(async move {
			while let Some(task) = rx.recv().await {
				if let Err(e) = sync_send_admin_task(&task, pool.as_ref(), &loop_addr, timeout).await {
					warn!("async admin task {:?} to {} failed: {}", task.op_code, loop_addr, e);
				}
			}
		});
		Self { addr, tx }
	}

	fn enqueue(&self, task: AdminTask) {
		if self.tx.send(task).is_err() {
			warn!("task manager for {} has shut down, dropping task", self.addr);
		}
	}
}

/// Owns one [`TaskManager`] (and the connection pool) per remote node
/// address, created lazily on first use.
pub struct TaskDispatcher {
	pool: Arc<dyn ConnectionPool>,
	timeout: Duration,
	managers: RwLock<HashMap<Address, Arc<TaskManager>>>,
}

impl TaskDispatcher {
	pub fn new(pool: Arc<dyn ConnectionPool>, timeout: Duration) -> Self {
		Self {
			pool,
			timeout,
			managers: RwLock::new(HashMap::new()),
		}
	}

	fn manager(&self, addr: &Address) -> Arc<TaskManager> {
		if let Some(m) = self.managers.read().unwrap().get(addr) {
			return m.clone();
		}
		self.managers
			.write()
			.unwrap()
			.entry(addr.clone())
			.or_insert_with(|| Arc::new(TaskManager::new(addr.clone(), self.pool.clone(), self.timeout)))
			.clone()
	}

	pub fn add_data_node_tasks(&self, addr: &Address, tasks: Vec<AdminTask>) {
		let manager = self.manager(addr);
		for task in tasks {
			manager.enqueue(task);
		}
	}

	pub fn add_meta_node_tasks(&self, addr: &Address, tasks: Vec<AdminTask>) {
		self.add_data_node_tasks(addr, tasks)
	}

	/// Used by create/decommission, where the caller awaits the ack.
	pub async fn sync_send_admin_task(&self, addr: &Address, task: AdminTask) -> Result<AdminTaskReply, Error> {
		sync_send_admin_task(&task, self.pool.as_ref(), addr, self.timeout).await
	}

	/// Drops the per-node task manager; in-flight queued tasks are lost,
	/// matching "the node's connection pool is closed asynchronously"
	/// in the decommission flow.
	pub fn close(&self, addr: &Address) {
		self.managers.write().unwrap().remove(addr);
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use async_trait::async_trait;
	use cm_util::ids::PartitionId;
	use crate::pool::{Connection, LoopbackConnectionPool};
	use crate::task::OpCode;

	struct FailingConnection;

	#[async_trait]
	impl Connection for FailingConnection {
		async fn send(&self, _task: &AdminTask) -> Result<AdminTaskReply, Error> {
			Err(Error::RemoteTaskFailed("connection reset".into()))
		}
	}

	struct FailingPool;

	#[async_trait]
	impl ConnectionPool for FailingPool {
		async fn get(&self, _addr: &Address) -> Result<Arc<dyn Connection>, Error> {
			Ok(Arc::new(FailingConnection))
		}
		fn put(&self, _addr: &Address, _conn: Arc<dyn Connection>, _force_close: bool) {
			panic!("a failed send must never be returned to the pool");
		}
	}

	#[tokio::test]
	async fn sync_send_succeeds_against_loopback() {
		let dispatcher = TaskDispatcher::new(Arc::new(LoopbackConnectionPool::new()), Duration::from_secs(1));
		let reply = dispatcher
			.sync_send_admin_task(&"n1:6000".to_string(), AdminTask::new(OpCode::HeartbeatData, PartitionId(1), vec![]))
			.await
			.unwrap();
		assert!(reply.ok);
	}

	#[tokio::test]
	async fn failed_send_is_not_returned_to_the_pool() {
		let dispatcher = TaskDispatcher::new(Arc::new(FailingPool), Duration::from_secs(1));
		let err = dispatcher
			.sync_send_admin_task(&"n1:6000".to_string(), AdminTask::new(OpCode::HeartbeatData, PartitionId(1), vec![]))
			.await
			.unwrap_err();
		assert!(matches!(err, Error::RemoteTaskFailed(_)));
	}

	#[tokio::test]
	async fn enqueue_is_drained_asynchronously() {
		let dispatcher = TaskDispatcher::new(Arc::new(LoopbackConnectionPool::new()), Duration::from_secs(1));
		dispatcher.add_data_node_tasks(
			&"n1:6000".to_string(),
			vec![AdminTask::new(OpCode::LoadDataPartition, PartitionId(1), vec![])],
		);
		// give the background drain task a chance to run
		tokio::time::sleep(Duration::from_millis(20)).await;
	}
}
