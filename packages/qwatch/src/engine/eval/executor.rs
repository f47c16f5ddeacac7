use super::filter::{compare_order_keys, evaluate, order_key};
use crate::engine::query::{Direction, OrderSpec, Query};
use crate::engine::types::StoredValue;
use crate::engine::update::ResultRow;
use crate::error::EvalError;
use smol_str::SmolStr;

type Row<'a> = (&'a str, &'a StoredValue);

/// Run a compiled query over a key/value snapshot.
///
/// Without ORDER BY, scanning stops as soon as LIMIT rows matched and rows come
/// back in iteration order. With ORDER BY, every match is sorted first and
/// LIMIT truncates afterwards. A type error aborts the whole run.
pub fn execute<'a, I>(query: &Query, rows: I) -> Result<Vec<ResultRow>, EvalError>
where
    I: IntoIterator<Item = Row<'a>>,
{
    let early_exit = if query.order_by.is_none() { query.limit } else { None };

    let mut matched: Vec<Row<'a>> = Vec::new();
    for (key, value) in rows {
        if let Some(cond) = &query.condition {
            if !evaluate(cond, key, value)? {
                continue;
            }
        }
        matched.push((key, value));
        if early_exit.is_some_and(|limit| matched.len() >= limit) {
            break;
        }
    }

    if let Some(order) = &query.order_by {
        matched = sort_rows(matched, order);
    }
    if let Some(limit) = query.limit {
        matched.truncate(limit);
    }

    // JSON rendering happens only for rows that survived the limit
    let selection = query.selection;
    Ok(matched
        .into_iter()
        .map(|(key, value)| ResultRow {
            key: selection.key.then(|| SmolStr::new(key)),
            value: selection.value.then(|| value.to_result_value()),
        })
        .collect())
}

fn sort_rows<'a>(rows: Vec<Row<'a>>, order: &OrderSpec) -> Vec<Row<'a>> {
    // Resolve each order key once instead of per comparison
    let mut keyed: Vec<_> = rows
        .into_iter()
        .map(|(key, value)| (order_key(&order.field, key, value), (key, value)))
        .collect();

    keyed.sort_by(|(a, (key_a, _)), (b, (key_b, _))| {
        let ord = compare_order_keys(a, b);
        let ord = match order.direction {
            Direction::Asc => ord,
            Direction::Desc => ord.reverse(),
        };
        // Keys are unique, so ties never depend on arrival order
        ord.then_with(|| key_a.cmp(key_b))
    });

    keyed.into_iter().map(|(_, row)| row).collect()
}

#[cfg(test)]
mod executor_tests {
    use super::*;
    use crate::engine::compiler::compile;
    use crate::engine::types::CacheStore;
    use serde_json::json;

    fn store(rows: &[(&str, StoredValue)]) -> CacheStore {
        rows.iter()
            .map(|(k, v)| (SmolStr::new(k), v.clone()))
            .collect()
    }

    fn run(sql: &str, data: &CacheStore) -> Result<Vec<ResultRow>, EvalError> {
        let query = compile(sql).unwrap();
        execute(&query, data.iter().map(|(k, v)| (k.as_str(), v)))
    }

    fn keys(rows: &[ResultRow]) -> Vec<&str> {
        rows.iter().filter_map(|r| r.key.as_deref()).collect()
    }

    fn simple_dataset() -> CacheStore {
        store(&[
            ("k2", "v4".into()),
            ("k4", "v2".into()),
            ("k3", "v3".into()),
            ("k5", "v1".into()),
            ("k1", "v5".into()),
            ("k", "k".into()),
        ])
    }

    #[test]
    fn test_order_by_key_asc() {
        let rows = run(
            "SELECT $key, $value WHERE $key LIKE 'k*' ORDER BY $key ASC",
            &simple_dataset(),
        )
        .unwrap();
        assert_eq!(keys(&rows), vec!["k", "k1", "k2", "k3", "k4", "k5"]);
        assert_eq!(rows[1].value, Some(StoredValue::Str("v5".into())));
    }

    #[test]
    fn test_order_by_value_desc_with_limit() {
        let rows = run(
            "SELECT $key WHERE $key LIKE 'k?' ORDER BY $value DESC LIMIT 2",
            &simple_dataset(),
        )
        .unwrap();
        assert_eq!(keys(&rows), vec!["k1", "k2"]);
        assert!(rows.iter().all(|r| r.value.is_none()));
    }

    #[test]
    fn test_limit_without_order_stops_early() {
        let rows = run("SELECT $value WHERE $key LIKE 'k*' LIMIT 3", &simple_dataset()).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.key.is_none() && r.value.is_some()));
    }

    #[test]
    fn test_no_matches_is_empty() {
        let rows = run("SELECT $key WHERE $key LIKE 'z*'", &simple_dataset()).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_type_mismatch_aborts_query() {
        let err = run("SELECT $key WHERE $value > 10", &simple_dataset()).unwrap_err();
        assert_eq!(err, EvalError::IncompatibleTypes { left: "string", right: "int64" });
    }

    #[test]
    fn test_numeric_filter() {
        let data = store(&[
            ("a", StoredValue::Int(3)),
            ("b", StoredValue::Int(12)),
            ("c", StoredValue::Int(7)),
        ]);
        let rows = run("SELECT $key WHERE $value > 10 OR $value < 5 ORDER BY $value", &data).unwrap();
        assert_eq!(keys(&rows), vec!["a", "b"]);
    }

    #[test]
    fn test_json_order_nil_placement() {
        let data = store(&[
            ("u1", StoredValue::Json(json!({"age": 30}))),
            ("u2", StoredValue::Json(json!({"name": "no age"}))),
            ("u3", StoredValue::Json(json!({"age": 20}))),
        ]);
        let asc = run("SELECT $key ORDER BY $value.age ASC", &data).unwrap();
        assert_eq!(keys(&asc), vec!["u3", "u1", "u2"]);

        let desc = run("SELECT $key ORDER BY $value.age DESC", &data).unwrap();
        assert_eq!(keys(&desc), vec!["u2", "u1", "u3"]);
    }

    #[test]
    fn test_json_filter_and_rendering() {
        let data = store(&[
            ("u1", StoredValue::Json(json!({"name": "Tom", "age": 30}))),
            ("u2", StoredValue::Json(json!({"name": "Ann", "age": 15}))),
            ("plain", "text".into()),
        ]);
        let rows = run("SELECT $key, $value WHERE $value.age >= 18", &data).unwrap();
        assert_eq!(keys(&rows), vec!["u1"]);
        match &rows[0].value {
            Some(StoredValue::Str(s)) => {
                let doc: serde_json::Value = serde_json::from_str(s).unwrap();
                assert_eq!(doc, json!({"name": "Tom", "age": 30}));
            }
            other => panic!("expected rendered JSON string, got {:?}", other),
        }
    }

    #[test]
    fn test_bool_ordering() {
        let data = store(&[
            ("a", StoredValue::Json(json!({"on": true}))),
            ("b", StoredValue::Json(json!({"on": false}))),
        ]);
        let rows = run("SELECT $key ORDER BY $value.on ASC", &data).unwrap();
        assert_eq!(keys(&rows), vec!["b", "a"]);
    }

    #[test]
    fn test_mixed_type_order_is_deterministic() {
        let data = store(&[
            ("s", "text".into()),
            ("i", StoredValue::Int(1)),
            ("f", StoredValue::Float(0.5)),
        ]);
        let first = run("SELECT $key ORDER BY $value", &data).unwrap();
        let reversed: CacheStore = data.iter().rev().map(|(k, v)| (k.clone(), v.clone())).collect();
        let second = run("SELECT $key ORDER BY $value", &reversed).unwrap();
        assert_eq!(first, second);
        // float < int64 < string by type name
        assert_eq!(keys(&first), vec!["f", "i", "s"]);
    }

    #[test]
    fn test_without_where_returns_everything() {
        let rows = run("SELECT *", &simple_dataset()).unwrap();
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0].key.as_deref(), Some("k2"));
    }
}
