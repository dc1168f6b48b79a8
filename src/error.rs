use std::fmt;

use thiserror::Error;

/// Which side of an IN clause was empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyPart {
    Columns,
    Rows,
}

impl fmt::Display for EmptyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmptyPart::Columns => f.write_str("column list"),
            EmptyPart::Rows => f.write_str("row list"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InClauseError {
    #[error("Empty input: {what} has no elements")]
    EmptyInput { what: EmptyPart },

    #[error("Shape mismatch: row {row} has {actual} values, expected {expected}")]
    ShapeMismatch {
        row: usize,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Clickhouse client error: {0}")]
    Client(#[from] clickhouse::error::Error),

    #[error("Invalid connection url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Query timed out")]
    Timeout,

    #[error("Binding count mismatch: query has {placeholders} placeholders, got {bindings} bindings")]
    BindingCount { placeholders: usize, bindings: usize },

    #[error("Invalid IN clause: {0}")]
    Clause(#[from] InClauseError),
}

impl From<tokio::time::error::Elapsed> for ExecutorError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}
