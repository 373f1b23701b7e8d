//! FILENAME: cube-engine/src/error.rs

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CubeError {
    #[error("Dimension builder '{0}' is already finalized")]
    BuilderFinalized(String),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Dimension '{dimension}' is already part of query '{query}'")]
    DuplicateDimension { query: String, dimension: String },

    #[error("Measure '{measure}' is already part of query '{query}'")]
    DuplicateMeasure { query: String, measure: String },

    #[error("Query '{0}' has no measures")]
    EmptyQuery(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Query '{0}' was not executed with this result")]
    UnknownQuery(String),

    #[error("Measure '{measure}' is not declared on query '{query}'")]
    UnknownMeasure { query: String, measure: String },

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("No match: {0}")]
    NoMatch(String),

    #[error("Type mismatch: cannot read {actual} measure value as {expected}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Decimal sum overflowed")]
    Overflow,

    #[error("Query '{query}' needs {cells} cells, limit is {limit}")]
    CapacityExceeded {
        query: String,
        cells: usize,
        limit: usize,
    },
}

pub type Result<T> = std::result::Result<T, CubeError>;
