use super::stored_value::StoredValue;
use super::RowKey;
use smol_str::SmolStr;
use tokio::sync::oneshot;

/// Operation type for key mutations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Set,
    Del,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Set => "SET",
            Operation::Del => "DEL",
        }
    }
}

/// A single committed change, delivered by storage in commit order.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationEvent {
    pub key: RowKey,
    /// `None` is a tombstone.
    pub value: Option<StoredValue>,
    pub operation: Operation,
}

impl MutationEvent {
    pub fn set(key: impl Into<RowKey>, value: StoredValue) -> Self {
        Self {
            key: key.into(),
            value: Some(value),
            operation: Operation::Set,
        }
    }

    pub fn del(key: impl Into<RowKey>) -> Self {
        Self {
            key: key.into(),
            value: None,
            operation: Operation::Del,
        }
    }
}

/// All key/value pairs matching a pattern at one point in time.
pub type Snapshot = Vec<(RowKey, StoredValue)>;

/// One-shot hydration request sent to storage. Storage answers exactly once
/// on `reply`; dropping it signals that the snapshot is unavailable.
#[derive(Debug)]
pub struct SnapshotRequest {
    pub pattern: SmolStr,
    pub reply: oneshot::Sender<Snapshot>,
}
