//! FILENAME: pivot-engine/src/error.rs

use thiserror::Error;

use crate::definition::AggregationType;

#[derive(Error, Debug)]
pub enum PivotError {
    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Field '{0}' is a measure and cannot be used for grouping or filtering")]
    NotADimension(String),

    #[error("Duplicate value id: {0}")]
    DuplicateValueId(String),

    #[error("Ratio value '{0}' has no denominator field")]
    MissingDenominator(String),

    #[error("Dimension '{key}' cannot be aggregated with {agg:?} (use count or distinctCount)")]
    DimensionAggregation { key: String, agg: AggregationType },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV output is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}
