mod executor;
mod filter;

pub use executor::execute;
pub use filter::{compare, compare_order_keys, evaluate, order_key, resolve_operand};
