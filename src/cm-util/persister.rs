//! Small on-disk snapshot helper for singleton records, grounded in
//! `garage_util::persister::Persister` (seen used as
//! `persist_cluster_layout`/`persist_peer_list` in the teacher's
//! membership manager). Used here for the id allocator's restart
//! recovery point and for caching the last known leader info.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::Error;

pub struct Persister<T> {
	path: PathBuf,
	_marker: PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned> Persister<T> {
	pub fn new(base_dir: &Path, file_name: &str) -> Self {
		let mut path = base_dir.to_path_buf();
		path.push(file_name);
		Self {
			path,
			_marker: PhantomData,
		}
	}

	pub fn load(&self) -> Result<T, Error> {
		let data = std::fs::read(&self.path)?;
		let value = serde_json::from_slice(&data)?;
		Ok(value)
	}

	pub fn save(&self, value: &T) -> Result<(), Error> {
		let data = serde_json::to_vec_pretty(value)?;
		let tmp_path = self.path.with_extension("tmp");
		std::fs::write(&tmp_path, &data)?;
		std::fs::rename(&tmp_path, &self.path)?;
		Ok(())
	}

	pub async fn save_async(&self, value: &T) -> Result<(), Error>
	where
		T: Send + Sync,
	{
		let data = serde_json::to_vec_pretty(value)?;
		let path = self.path.clone();
		let tmp_path = path.with_extension("tmp");
		tokio::fs::write(&tmp_path, &data).await?;
		tokio::fs::rename(&tmp_path, &path).await?;
		Ok(())
	}
}
