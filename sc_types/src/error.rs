//! Error types for the data model.

use thiserror::Error;

/// Errors raised by the annotated-matrix data model and the analysis code
/// built on top of it.
#[derive(Error, Debug)]
pub enum ScError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("missing obs column '{0}'")]
    MissingObsColumn(String),

    #[error("missing var column '{0}'")]
    MissingVarColumn(String),

    #[error("column '{column}' does not hold {expected} values")]
    ColumnType {
        column: String,
        expected: &'static str,
    },

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("empty data: {0}")]
    EmptyData(String),
}
