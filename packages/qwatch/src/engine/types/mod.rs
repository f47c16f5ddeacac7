mod events;
mod path;
mod stored_value;

pub use events::{MutationEvent, Operation, Snapshot, SnapshotRequest};
pub use path::{JsonPath, PathSegment};
pub use stored_value::{Scalar, StoredValue};

use indexmap::IndexMap;
use rustc_hash::FxHasher;
use smol_str::SmolStr;
use std::hash::BuildHasherDefault;

pub type RowKey = SmolStr;
pub type FastMap<K, V> = std::collections::HashMap<K, V, BuildHasherDefault<FxHasher>>;

/// Per-fingerprint row cache. Insertion ordered, so unordered results come back
/// in the order keys first entered the cache.
pub type CacheStore = IndexMap<RowKey, StoredValue, BuildHasherDefault<FxHasher>>;
