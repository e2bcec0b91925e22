//! Error types for the DEMARK library

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DemarkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Malformed matrix: {0}")]
    MalformedMatrix(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: String, actual: String },

    #[error("Overflow: {0}")]
    Overflow(String),

    #[error("Unknown test '{0}' (expected one of: rank_sum, t)")]
    UnknownTest(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Empty data: {0}")]
    EmptyData(String),
}

pub type Result<T> = std::result::Result<T, DemarkError>;
