use crate::engine::types::JsonPath;
use smol_str::SmolStr;
use std::fmt;

pub const KEY_COLUMN: &str = "$key";
pub const VALUE_COLUMN: &str = "$value";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Selection {
    pub key: bool,
    pub value: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    NotLike,
    IsNull,
    IsNotNull,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Neq => "!=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
        }
    }

    /// Unary operators carry `Operand::Null` on the right.
    pub fn is_unary(&self) -> bool {
        matches!(self, Operator::IsNull | Operator::IsNotNull)
    }
}

/// One side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Key,
    Value,
    JsonPath(JsonPath),
    Str(SmolStr),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Key => f.write_str(KEY_COLUMN),
            Operand::Value => f.write_str(VALUE_COLUMN),
            Operand::JsonPath(path) => write!(f, "{}.{}", VALUE_COLUMN, path),
            Operand::Str(s) => {
                f.write_str("'")?;
                for c in s.chars() {
                    if c == '\'' || c == '\\' {
                        f.write_str("\\")?;
                    }
                    write!(f, "{}", c)?;
                }
                f.write_str("'")
            }
            Operand::Int(i) => write!(f, "{}", i),
            // Debug keeps the fractional part, so `10.0` never renders like `10`
            Operand::Float(v) => write!(f, "{:?}", v),
            Operand::Bool(true) => f.write_str("TRUE"),
            Operand::Bool(false) => f.write_str("FALSE"),
            Operand::Null => f.write_str("NULL"),
        }
    }
}

/// WHERE clause tree. Immutable once compiled.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Comparison {
        left: Operand,
        op: Operator,
        right: Operand,
    },
}

impl Condition {
    pub fn and(left: Condition, right: Condition) -> Self {
        Condition::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: Condition, right: Condition) -> Self {
        Condition::Or(Box::new(left), Box::new(right))
    }

    pub fn compare(left: Operand, op: Operator, right: Operand) -> Self {
        Condition::Comparison { left, op, right }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Or(l, r) => write!(f, "{} OR {}", l, r),
            Condition::And(l, r) => {
                fmt_and_side(l, f)?;
                f.write_str(" AND ")?;
                fmt_and_side(r, f)
            }
            Condition::Comparison { left, op, right } => {
                if op.is_unary() {
                    write!(f, "{} {}", left, op.as_str())
                } else {
                    write!(f, "{} {} {}", left, op.as_str(), right)
                }
            }
        }
    }
}

fn fmt_and_side(c: &Condition, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match c {
        Condition::Or(..) => write!(f, "({})", c),
        _ => write!(f, "{}", c),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// ORDER BY target. Restricted to the pseudo-columns.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderField {
    Key,
    Value,
    JsonPath(JsonPath),
}

impl fmt::Display for OrderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderField::Key => f.write_str(KEY_COLUMN),
            OrderField::Value => f.write_str(VALUE_COLUMN),
            OrderField::JsonPath(path) => write!(f, "{}.{}", VALUE_COLUMN, path),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpec {
    pub field: OrderField,
    pub direction: Direction,
}

/// Compiled DSQL query. Built once by [`crate::compile`] and shared behind an
/// `Arc` for every later re-evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub selection: Selection,
    pub condition: Option<Condition>,
    pub order_by: Option<OrderSpec>,
    pub limit: Option<usize>,
    pub key_pattern: SmolStr,
    pub fingerprint: SmolStr,
}

impl fmt::Display for Query {
    /// Canonical text, echoed back in every push envelope.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SELECT ")?;
        match (self.selection.key, self.selection.value) {
            (true, true) => write!(f, "{}, {}", KEY_COLUMN, VALUE_COLUMN)?,
            (true, false) => f.write_str(KEY_COLUMN)?,
            (false, true) => f.write_str(VALUE_COLUMN)?,
            (false, false) => f.write_str("*")?,
        }
        if let Some(cond) = &self.condition {
            write!(f, " WHERE {}", cond)?;
        }
        if let Some(order) = &self.order_by {
            write!(f, " ORDER BY {} {}", order.field, order.direction.as_str())?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {}", limit)?;
        }
        Ok(())
    }
}
