use thiserror::Error;

/// Errors raised while compiling DSQL text. Never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("error parsing SQL statement: syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("unsupported SQL statement: {0}")]
    UnsupportedStatement(String),

    #[error("{0}")]
    InvalidSelection(String),

    #[error("HAVING and GROUP BY clauses are not supported")]
    UnsupportedClause,

    #[error("only one ORDER BY clause is supported")]
    MultipleOrderBy,

    #[error("only $key and $value are supported in ORDER BY clause")]
    InvalidOrderBy,

    #[error("invalid LIMIT value: {0}")]
    InvalidLimit(String),

    #[error("invalid JSON path: {0}")]
    InvalidJsonPath(String),
}

impl CompileError {
    pub(crate) fn syntax(position: usize, message: impl Into<String>) -> Self {
        CompileError::Syntax {
            position,
            message: message.into(),
        }
    }
}

/// Errors raised while evaluating a compiled query. Aborts the whole
/// evaluation, never the subscription.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("incompatible types in comparison: {left} and {right}")]
    IncompatibleTypes {
        left: &'static str,
        right: &'static str,
    },

    #[error("unsupported operator {op} for type {ty}")]
    UnsupportedOperator { op: &'static str, ty: &'static str },

    #[error("unsupported JSON path result type: {0}")]
    UnsupportedJsonType(&'static str),
}

/// Errors surfaced by the subscription manager to its callers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error("fingerprint was not found in the cache: {0}")]
    FingerprintNotFound(String),

    #[error("hydration failed: {0}")]
    HydrationFailed(String),

    #[error("query manager is not running")]
    ManagerClosed,
}

pub type Result<T> = std::result::Result<T, QueryError>;
