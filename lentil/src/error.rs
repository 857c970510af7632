//! Error taxonomy of the embedding pipeline

use thiserror::Error;

/// Every pipeline failure surfaces to the caller as one of these; the
/// pipeline never retries and never substitutes defaults.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LentilError {
    /// Malformed or empty input data
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    /// A parameter is out of its valid range relative to the data
    #[error("Invalid configuration of {parameter}: {reason}")]
    Configuration { parameter: String, reason: String },

    /// A required key column is missing or not a key
    #[error("Schema error on column {column}: {reason}")]
    Schema { column: String, reason: String },

    /// The request was superseded before the computation finished
    #[error("Cancelled during {stage}")]
    Cancelled { stage: String },
}

pub type Result<T> = std::result::Result<T, LentilError>;

impl LentilError {
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        LentilError::InvalidInput {
            reason: reason.into(),
        }
    }

    pub fn configuration(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        LentilError::Configuration {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    pub fn schema(column: impl Into<String>, reason: impl Into<String>) -> Self {
        LentilError::Schema {
            column: column.into(),
            reason: reason.into(),
        }
    }

    pub fn cancelled(stage: impl Into<String>) -> Self {
        LentilError::Cancelled {
            stage: stage.into(),
        }
    }
}
