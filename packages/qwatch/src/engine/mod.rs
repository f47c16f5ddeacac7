pub mod compiler;
pub mod eval;
pub mod fingerprint;
pub mod lexer;
pub mod query;
pub mod types;
pub mod update;
pub mod wildcard;

pub use compiler::compile;
pub use query::{Condition, Direction, Operand, Operator, OrderField, OrderSpec, Query, Selection};
pub use types::{CacheStore, FastMap, JsonPath, RowKey, Scalar, StoredValue};
pub use update::{QueryUpdate, ResultRow};
