use thiserror::Error;

/// Custom Result type for this crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// The Error type for filter pipeline operations.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unknown filter `{0}`")]
    UnknownFilter(String),

    /// A filter step that does not match its filter definition: missing or
    /// unsupported parameters, or a `language` attribute mismatch.
    #[error("Invalid step for filter `{filter}`: {reason}")]
    InvalidStep { filter: String, reason: String },

    #[error("Language `{0}` is not a column of this dataset")]
    UnknownLanguage(String),

    #[error("I/O error: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },

    /// An external filter process exited with a non-zero status. Carries the
    /// captured diagnostic stream so the caller can report the real cause.
    #[error("Step {index} (`{filter}`) exited with status {code}:\n{stderr}")]
    ProcessFailed {
        index: usize,
        filter: String,
        code: i32,
        stderr: String,
    },

    /// Row misalignment detected while routing a column through a
    /// subprocess. Never tolerated, since it would corrupt sibling columns.
    #[error("Stream integrity error: {0}")]
    StreamIntegrity(String),

    #[error("Serialization/Deserialization error: {source}")]
    SerializationError {
        #[from]
        source: serde_json::Error,
    },

    #[error("Background task error: {0}")]
    TaskError(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(err: tokio::task::JoinError) -> Self {
        PipelineError::TaskError(err.to_string())
    }
}
