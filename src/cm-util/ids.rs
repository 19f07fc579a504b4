//! Newtype identifiers, keeping the node id-space distinct from the
//! partition/volume id-space at the type level even though both are
//! ultimately allocated by the same kind of monotonic counter (§4.A).

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_newtype {
	($name:ident) => {
		#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		pub struct $name(pub u64);

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}", self.0)
			}
		}

		impl From<u64> for $name {
			fn from(v: u64) -> Self {
				$name(v)
			}
		}
	};
}

id_newtype!(NodeId);
id_newtype!(VolumeId);
id_newtype!(PartitionId);
id_newtype!(NodeSetId);

/// Node/rack address, in `host:port` form. The transport layer (out of
/// scope here) is what actually dials it.
pub type Address = String;
