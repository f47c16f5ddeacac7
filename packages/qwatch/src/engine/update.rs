//! Result rows and the push envelope sent to subscribers.

use crate::engine::types::StoredValue;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use smol_str::SmolStr;

pub const QWATCH_CMD: &str = "qwatch";

/// One output row. Fields excluded by the selection are `None`; JSON values
/// arrive rendered as strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub key: Option<SmolStr>,
    pub value: Option<StoredValue>,
}

/// Push sent to every subscriber of a query after each relevant change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryUpdate {
    pub cmd: SmolStr,
    /// Canonical query text.
    pub query: String,
    pub rows: Vec<ResultRow>,
}

impl QueryUpdate {
    pub fn new(query: String, rows: Vec<ResultRow>) -> Self {
        Self {
            cmd: SmolStr::new_static(QWATCH_CMD),
            query,
            rows,
        }
    }

    /// Three-element wire form: `["qwatch", query, rows]`.
    pub fn to_envelope(&self) -> Value {
        json!([self.cmd, self.query, self.rows])
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().filter_map(|r| r.key.as_deref())
    }
}

#[cfg(test)]
mod update_tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let update = QueryUpdate::new(
            "SELECT $key".to_string(),
            vec![ResultRow {
                key: Some("k1".into()),
                value: None,
            }],
        );
        assert_eq!(
            update.to_envelope(),
            json!(["qwatch", "SELECT $key", [{"key": "k1", "value": null}]])
        );
        assert_eq!(update.keys().collect::<Vec<_>>(), vec!["k1"]);
    }
}
