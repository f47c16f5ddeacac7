// src/lib.rs

pub mod engine;
pub mod error;
pub mod manager;

// Re-export commonly used types for convenience
pub use engine::compile;
pub use engine::types::{MutationEvent, Operation, Snapshot, SnapshotRequest};
pub use engine::wildcard::wildcard_match;
pub use engine::{Query, QueryUpdate, ResultRow, RowKey, StoredValue};
pub use error::{CompileError, EvalError, QueryError};
pub use manager::{Manager, ManagerConfig, ManagerHandle, SubscriberId};
