// src/error.rs

use polars::prelude::PolarsError;
use thiserror::Error;

/// Errors surfaced by the EOF pipeline.
///
/// Argument errors are raised before any computation starts. Data-shape errors
/// are raised while reshaping the tidy table into a matrix. Failures inside the
/// linear algebra backend are reported as [`EofError::Linalg`] and never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EofError {
    #[error("`fill` must be numeric, NaN or null, got {0}")]
    InvalidFill(String),

    #[error("columns not found in data: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("column '{0}' must be numeric")]
    NonNumericColumn(String),

    #[error("no {0} variables given")]
    EmptyAxis(&'static str),

    #[error("column '{0}' contains nulls")]
    NullValues(String),

    #[error("column name '{0}' would appear twice in the output")]
    DuplicateColumn(String),

    #[error("component {requested} requested but the matrix supports at most {max}")]
    ComponentOutOfRange { requested: usize, max: usize },

    #[error("component indices are 1-based, got {0}")]
    InvalidComponent(usize),

    #[error("probability {0} is outside [0, 1]")]
    InvalidProbability(f64),

    #[error("bootstrap needs at least two samples")]
    InvalidBootstrap,

    #[error("{context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("no components selected")]
    NoComponents,

    #[error("row and column variables do not identify a unique value: more than one observation for cell ({row}) x ({col})")]
    DuplicateCell { row: String, col: String },

    #[error("data is not rectangular: {filled} of {rows}x{cols} cells filled from {observations} rows; supply a `fill` value for missing combinations")]
    NotRectangular {
        filled: usize,
        rows: usize,
        cols: usize,
        observations: usize,
    },

    #[error("matrix contains {0} non-finite values")]
    NonFiniteMatrix(usize),

    #[error("linear algebra backend failed: {0}")]
    Linalg(String),

    #[error("polars error: {0}")]
    Polars(String),
}

impl From<PolarsError> for EofError {
    fn from(e: PolarsError) -> Self {
        EofError::Polars(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EofError>;
