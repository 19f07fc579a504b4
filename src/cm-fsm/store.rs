//! The on-disk key/value store (§6, "Store interface (consumed)"),
//! standing in for the real store. Both the id allocator's restart
//! recovery and the FSM apply path use this trait; only the gateway
//! touches it directly (§5, "Shared resource policy").

use std::collections::BTreeMap;
use std::sync::Mutex;

use cm_util::error::Error;

pub trait Store: Send + Sync {
	fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error>;
	fn put(&self, key: &str, value: &[u8]) -> Result<(), Error>;
	fn delete(&self, key: &str) -> Result<(), Error>;
	/// Range scan over all keys sharing `prefix`, sorted lexicographically.
	fn range(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, Error>;
}

/// In-memory store used for tests and for the single-node demo mode.
#[derive(Default)]
pub struct InMemoryStore {
	data: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStore {
	pub fn new() -> Self {
		Self::default()
	}
}

impl Store for InMemoryStore {
	fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
		Ok(self.data.lock().unwrap().get(key).cloned())
	}

	fn put(&self, key: &str, value: &[u8]) -> Result<(), Error> {
		self.data
			.lock()
			.unwrap()
			.insert(key.to_string(), value.to_vec());
		Ok(())
	}

	fn delete(&self, key: &str) -> Result<(), Error> {
		self.data.lock().unwrap().remove(key);
		Ok(())
	}

	fn range(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, Error> {
		Ok(self
			.data
			.lock()
			.unwrap()
			.range(prefix.to_string()..)
			.take_while(|(k, _)| k.starts_with(prefix))
			.map(|(k, v)| (k.clone(), v.clone()))
			.collect())
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn range_scan_respects_prefix() {
		let store = InMemoryStore::new();
		store.put("id/common", b"1").unwrap();
		store.put("id/dp", b"2").unwrap();
		store.put("vol/a", b"3").unwrap();

		let ids = store.range("id/").unwrap();
		assert_eq!(ids.len(), 2);
	}
}
