use thiserror::Error;

use crate::validation::ValidationReport;

/// Core error type shared across datagen crates.
#[derive(Debug, Error)]
pub enum Error {
    /// The DSL document failed validation; every issue found is attached.
    #[error("{}", .0.render())]
    Validation(ValidationReport),
    /// A reference pattern the builder accepted cannot be interpreted.
    #[error("Invalid reference pattern: '{0}'")]
    InvalidReference(String),
    /// The document is not valid JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias for results returned by datagen crates.
pub type Result<T> = std::result::Result<T, Error>;
