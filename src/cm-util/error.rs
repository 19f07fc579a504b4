//! Error kinds shared by every cluster-master crate.
//!
//! This mirrors the semantic (not typed) error kinds enumerated in the
//! design: `NotFound`, `AlreadyExists`, `NoResource`, `QuorumLost`,
//! `NotLeader`, `ProposalFailed`, `RemoteTaskFailed`, `Timeout` and
//! `InvalidArgument`, plus the small set of transparent wrappers every
//! crate needs around `std::io::Error` and serialization failures.

use err_derive::Error;

#[derive(Debug, Error)]
pub enum Error {
	/// A named entity (volume, node, partition, rack, node-set) does not exist
	#[error(display = "not found: {}", _0)]
	NotFound(String),

	/// An entity with this identity already exists
	#[error(display = "already exists: {}", _0)]
	AlreadyExists(String),

	/// No writable node/rack/node-set could satisfy a placement request
	#[error(display = "no resource: {}", _0)]
	NoResource(String),

	/// A partition no longer has enough live replicas to preserve quorum
	#[error(display = "quorum lost: {}", _0)]
	QuorumLost(String),

	/// The local node is not the consensus leader and cannot mutate state
	#[error(display = "not leader")]
	NotLeader,

	/// A consensus proposal was rejected or timed out before it committed
	#[error(display = "proposal failed: {}", _0)]
	ProposalFailed(String),

	/// An admin task sent to a remote data/meta node failed
	#[error(display = "remote task failed: {}", _0)]
	RemoteTaskFailed(String),

	/// A bounded wait (RPC, proposal commit) exceeded its deadline
	#[error(display = "timeout: {}", _0)]
	Timeout(String),

	/// A caller-supplied argument violates a documented precondition
	#[error(display = "invalid argument: {}", _0)]
	InvalidArgument(String),

	/// Catch-all for conditions with no more specific kind above
	#[error(display = "{}", _0)]
	Message(String),

	#[error(display = "IO error: {}", _0)]
	Io(#[error(source)] std::io::Error),

	#[error(display = "serialization error: {}", _0)]
	Json(#[error(source)] serde_json::Error),

	#[error(display = "configuration error: {}", _0)]
	TomlDe(#[error(source)] toml::de::Error),
}

impl From<&str> for Error {
	fn from(s: &str) -> Error {
		Error::Message(s.to_string())
	}
}

impl From<String> for Error {
	fn from(s: String) -> Error {
		Error::Message(s)
	}
}

impl Error {
	/// True for error kinds that a leader-gated reconciler loop should log
	/// and continue past rather than treat as fatal to the loop.
	pub fn is_transient(&self) -> bool {
		matches!(
			self,
			Error::RemoteTaskFailed(_) | Error::Timeout(_) | Error::NotLeader
		)
	}
}

/// Extension trait mirroring `ok_or_message`-style helpers: turns an
/// `Option` into a `Result` with a lazily built `NotFound` error.
pub trait OkOrNotFound<T> {
	fn ok_or_not_found(self, what: impl Into<String>) -> Result<T, Error>;
}

impl<T> OkOrNotFound<T> for Option<T> {
	fn ok_or_not_found(self, what: impl Into<String>) -> Result<T, Error> {
		self.ok_or_else(|| Error::NotFound(what.into()))
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn transient_classification() {
		assert!(Error::Timeout("x".into()).is_transient());
		assert!(!Error::InvalidArgument("x".into()).is_transient());
	}
}
