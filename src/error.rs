use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CaptureError {
    #[error("missing required parameter: {0}")]
    MissingParameter(String),

    #[error("invalid instrument class: {0}")]
    InvalidInstrumentClass(String),

    #[error("invalid perspective: {0}")]
    InvalidPerspective(String),

    #[error("invalid share connector type: {0}")]
    InvalidConnectorKind(String),

    #[error("invalid existing-directory policy: {0}")]
    InvalidConflictPolicy(String),

    #[error("dataset not found at source: {0}")]
    DatasetNotFound(String),

    #[error("dataset shape {shape} not allowed for instrument class {class}")]
    UnexpectedShape { shape: String, class: String },

    #[error("source not ready: {0}")]
    NotReady(String),

    #[error("dataset failed validation: {0}")]
    Validation(String),

    #[error("destination conflict: {0}")]
    DestinationConflict(String),

    #[error("share connection failed (code {code}): {message}")]
    ShareConnect { code: u32, message: String },

    #[error("copy failed: {0}")]
    Copy(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
