use crate::engine::query::{Condition, Operand, Operator, OrderField};
use crate::engine::types::{Scalar, StoredValue};
use crate::engine::wildcard::wildcard_match;
use crate::error::EvalError;
use std::cmp::Ordering;

/// Resolve a comparison operand against one row.
///
/// JSON paths on non-JSON rows and absent paths resolve to `Nil`.
#[inline]
pub fn resolve_operand<'a>(
    operand: &'a Operand,
    key: &'a str,
    value: &'a StoredValue,
) -> Result<Scalar<'a>, EvalError> {
    match operand {
        Operand::Key => Ok(Scalar::Str(key)),
        Operand::Value => Ok(value.as_scalar()),
        Operand::JsonPath(path) => match value.as_json().and_then(|doc| path.resolve(doc)) {
            Some(found) => Scalar::from_json(found),
            None => Ok(Scalar::Nil),
        },
        Operand::Str(s) => Ok(Scalar::Str(s.as_str())),
        Operand::Int(i) => Ok(Scalar::Int(*i)),
        Operand::Float(f) => Ok(Scalar::Float(*f)),
        Operand::Bool(b) => Ok(Scalar::Bool(*b)),
        Operand::Null => Ok(Scalar::Nil),
    }
}

/// Evaluate a WHERE clause for one row.
///
/// Both sides of AND/OR are always evaluated so a type error surfaces no
/// matter how the operands are ordered.
pub fn evaluate(cond: &Condition, key: &str, value: &StoredValue) -> Result<bool, EvalError> {
    match cond {
        Condition::And(l, r) => {
            let left = evaluate(l, key, value)?;
            let right = evaluate(r, key, value)?;
            Ok(left && right)
        }
        Condition::Or(l, r) => {
            let left = evaluate(l, key, value)?;
            let right = evaluate(r, key, value)?;
            Ok(left || right)
        }
        Condition::Comparison { left, op, right } => {
            let l = resolve_operand(left, key, value)?;
            let r = resolve_operand(right, key, value)?;
            compare(l, *op, r)
        }
    }
}

pub fn compare(left: Scalar<'_>, op: Operator, right: Scalar<'_>) -> Result<bool, EvalError> {
    match op {
        Operator::IsNull => return Ok(left.is_nil()),
        Operator::IsNotNull => return Ok(!left.is_nil()),
        _ => {}
    }

    // Anything touching Nil is a non-match, never an error
    if left.is_nil() || right.is_nil() {
        return Ok(false);
    }

    if left.type_name() != right.type_name() {
        return Err(EvalError::IncompatibleTypes {
            left: left.type_name(),
            right: right.type_name(),
        });
    }

    match (left, right) {
        (Scalar::Str(l), Scalar::Str(r)) => match op {
            Operator::Like => Ok(wildcard_match(r, l)),
            Operator::NotLike => Ok(!wildcard_match(r, l)),
            _ => Ok(matches_ordering(op, l.cmp(r))),
        },
        _ => {
            let unsupported = EvalError::UnsupportedOperator {
                op: op.as_str(),
                ty: left.type_name(),
            };
            if matches!(op, Operator::Like | Operator::NotLike) {
                return Err(unsupported);
            }
            match left.cmp_same_type(&right) {
                Some(ord) => Ok(matches_ordering(op, ord)),
                None => Err(unsupported),
            }
        }
    }
}

#[inline]
fn matches_ordering(op: Operator, ord: Ordering) -> bool {
    match op {
        Operator::Eq => ord == Ordering::Equal,
        Operator::Neq => ord != Ordering::Equal,
        Operator::Lt => ord == Ordering::Less,
        Operator::Lte => ord != Ordering::Greater,
        Operator::Gt => ord == Ordering::Greater,
        Operator::Gte => ord != Ordering::Less,
        _ => false,
    }
}

/// ORDER BY key for one row. Path results that cannot be ordered count as Nil.
#[inline]
pub fn order_key<'a>(field: &OrderField, key: &'a str, value: &'a StoredValue) -> Scalar<'a> {
    match field {
        OrderField::Key => Scalar::Str(key),
        OrderField::Value => value.as_scalar(),
        OrderField::JsonPath(path) => value
            .as_json()
            .and_then(|doc| path.resolve(doc))
            .and_then(|found| Scalar::from_json(found).ok())
            .unwrap_or(Scalar::Nil),
    }
}

/// Ascending order between two order keys: Nil last, mismatched types by type
/// name, same types by value.
pub fn compare_order_keys(a: &Scalar<'_>, b: &Scalar<'_>) -> Ordering {
    match (a.is_nil(), b.is_nil()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            if a.type_name() != b.type_name() {
                a.type_name().cmp(b.type_name())
            } else {
                a.cmp_same_type(b).unwrap_or(Ordering::Equal)
            }
        }
    }
}
