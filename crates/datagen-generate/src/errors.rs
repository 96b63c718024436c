use thiserror::Error;

use datagen_core::ValidationReport;

/// Errors emitted while generating data from a validated tree.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("{}", .0.render())]
    Validation(ValidationReport),
    #[error("Invalid reference pattern: '{0}'")]
    InvalidReference(String),
    #[error("{message}")]
    FilteringExhausted { message: String, attempts: u32 },
    #[error("generator '{generator}' failed: {message}")]
    Generator { generator: String, message: String },
    #[error("Unknown generator: {0}")]
    UnknownGenerator(String),
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),
    #[error("Circular self reference on field '{0}'")]
    CircularReference(String),
    #[error("Shadow binding '${0}' is not defined in this item")]
    UnboundShadow(String),
    #[error("invalid options: {0}")]
    InvalidOptions(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl GenerationError {
    pub(crate) fn generator(generator: &str, message: impl Into<String>) -> Self {
        Self::Generator {
            generator: generator.to_string(),
            message: message.into(),
        }
    }
}

impl From<datagen_core::Error> for GenerationError {
    fn from(err: datagen_core::Error) -> Self {
        match err {
            datagen_core::Error::Validation(report) => Self::Validation(report),
            datagen_core::Error::InvalidReference(raw) => Self::InvalidReference(raw),
            datagen_core::Error::Json(err) => Self::Json(err),
        }
    }
}
