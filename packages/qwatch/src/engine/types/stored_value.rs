use crate::error::EvalError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smol_str::SmolStr;
use std::cmp::Ordering;
use std::fmt;

/// A value as held by the storage engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredValue {
    Int(i64),
    Float(f64),
    Str(SmolStr),
    Json(Value),
}

impl StoredValue {
    /// Infer the native type of raw command text.
    ///
    /// Integer text becomes `Int`, other numeric text `Float`, text that looks
    /// like a JSON document and parses as one becomes `Json`, anything else `Str`.
    pub fn infer(raw: &str) -> Self {
        if let Ok(i) = raw.parse::<i64>() {
            return StoredValue::Int(i);
        }
        if let Ok(f) = raw.parse::<f64>() {
            if f.is_finite() {
                return StoredValue::Float(f);
            }
        }
        let trimmed = raw.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(doc) = serde_json::from_str::<Value>(raw) {
                return StoredValue::Json(doc);
            }
        }
        StoredValue::Str(SmolStr::new(raw))
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            StoredValue::Json(doc) => Some(doc),
            _ => None,
        }
    }

    /// Runtime view of the value as a `$value` operand.
    #[inline]
    pub fn as_scalar(&self) -> Scalar<'_> {
        match self {
            StoredValue::Int(i) => Scalar::Int(*i),
            StoredValue::Float(f) => Scalar::Float(*f),
            StoredValue::Str(s) => Scalar::Str(s.as_str()),
            StoredValue::Json(doc) => Scalar::Json(doc),
        }
    }

    /// Copy of the value suitable for a result row: JSON documents are
    /// rendered to their compact string form.
    pub fn to_result_value(&self) -> StoredValue {
        match self {
            StoredValue::Json(doc) => StoredValue::Str(SmolStr::new(doc.to_string())),
            other => other.clone(),
        }
    }
}

impl From<Value> for StoredValue {
    fn from(v: Value) -> Self {
        match v {
            Value::String(s) => StoredValue::Str(SmolStr::from(s)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => StoredValue::Int(i),
                None => StoredValue::Float(n.as_f64().unwrap_or(0.0)),
            },
            other => StoredValue::Json(other),
        }
    }
}

impl From<&str> for StoredValue {
    fn from(s: &str) -> Self {
        StoredValue::Str(SmolStr::new(s))
    }
}

impl From<i64> for StoredValue {
    fn from(i: i64) -> Self {
        StoredValue::Int(i)
    }
}

impl From<f64> for StoredValue {
    fn from(f: f64) -> Self {
        StoredValue::Float(f)
    }
}

impl fmt::Display for StoredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoredValue::Int(i) => write!(f, "{}", i),
            StoredValue::Float(v) => write!(f, "{}", v),
            StoredValue::Str(s) => f.write_str(s),
            StoredValue::Json(doc) => write!(f, "{}", doc),
        }
    }
}

/// Operand value resolved for a single row during evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar<'a> {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(&'a str),
    Json(&'a Value),
}

impl<'a> Scalar<'a> {
    /// Convert a JSON path result. Integral numbers are treated as int64, so
    /// `10.0` and `10` compare equal through a path.
    pub fn from_json(v: &'a Value) -> Result<Self, EvalError> {
        match v {
            Value::Null => Ok(Scalar::Nil),
            Value::Bool(b) => Ok(Scalar::Bool(*b)),
            Value::String(s) => Ok(Scalar::Str(s.as_str())),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    return Ok(Scalar::Int(i));
                }
                let f = n.as_f64().unwrap_or(f64::NAN);
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                    Ok(Scalar::Int(f as i64))
                } else {
                    Ok(Scalar::Float(f))
                }
            }
            Value::Array(_) => Err(EvalError::UnsupportedJsonType("array")),
            Value::Object(_) => Err(EvalError::UnsupportedJsonType("object")),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Scalar::Nil => "nil",
            Scalar::Bool(_) => "bool",
            Scalar::Int(_) => "int64",
            Scalar::Float(_) => "float",
            Scalar::Str(_) => "string",
            Scalar::Json(_) => "json",
        }
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Scalar::Nil)
    }

    /// Ordering between two values of the same runtime type. `None` when the
    /// types differ or the type has no natural order.
    pub fn cmp_same_type(&self, other: &Scalar<'_>) -> Option<Ordering> {
        match (self, other) {
            (Scalar::Bool(a), Scalar::Bool(b)) => Some(a.cmp(b)),
            (Scalar::Int(a), Scalar::Int(b)) => Some(a.cmp(b)),
            (Scalar::Float(a), Scalar::Float(b)) => Some(a.partial_cmp(b).unwrap_or(Ordering::Equal)),
            (Scalar::Str(a), Scalar::Str(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod stored_value_tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_infer_int() {
        assert_eq!(StoredValue::infer("42"), StoredValue::Int(42));
        assert_eq!(StoredValue::infer("-7"), StoredValue::Int(-7));
    }

    #[test]
    fn test_infer_float() {
        assert_eq!(StoredValue::infer("3.5"), StoredValue::Float(3.5));
    }

    #[test]
    fn test_infer_json() {
        let v = StoredValue::infer(r#"{"name":"Tom","age":30}"#);
        assert_eq!(v.as_json().and_then(|d| d.get("name")), Some(&json!("Tom")));
    }

    #[test]
    fn test_infer_string_fallbacks() {
        assert_eq!(StoredValue::infer("v1"), StoredValue::Str("v1".into()));
        // Looks like JSON but does not parse
        assert_eq!(StoredValue::infer("{oops"), StoredValue::Str("{oops".into()));
        // Non-finite numbers stay text
        assert_eq!(StoredValue::infer("inf"), StoredValue::Str("inf".into()));
    }

    #[test]
    fn test_result_value_renders_json() {
        let v = StoredValue::Json(json!({"a": 1}));
        assert_eq!(v.to_result_value(), StoredValue::Str(r#"{"a":1}"#.into()));
        assert_eq!(StoredValue::Int(3).to_result_value(), StoredValue::Int(3));
    }

    #[test]
    fn test_scalar_from_json_numbers() {
        assert_eq!(Scalar::from_json(&json!(20)), Ok(Scalar::Int(20)));
        assert_eq!(Scalar::from_json(&json!(10.0)), Ok(Scalar::Int(10)));
        assert_eq!(Scalar::from_json(&json!(18.1)), Ok(Scalar::Float(18.1)));
    }

    #[test]
    fn test_scalar_from_json_containers_rejected() {
        assert_eq!(
            Scalar::from_json(&json!([1, 2])),
            Err(EvalError::UnsupportedJsonType("array"))
        );
        assert_eq!(
            Scalar::from_json(&json!({"a": 1})),
            Err(EvalError::UnsupportedJsonType("object"))
        );
        assert_eq!(Scalar::from_json(&json!(null)), Ok(Scalar::Nil));
    }

    #[test]
    fn test_cmp_same_type() {
        assert_eq!(
            Scalar::Bool(false).cmp_same_type(&Scalar::Bool(true)),
            Some(Ordering::Less)
        );
        assert_eq!(Scalar::Str("a").cmp_same_type(&Scalar::Int(1)), None);
    }
}
