use thiserror::Error;

/// Error type returned by task callbacks.
pub type BoxError = Box<dyn std::error::Error>;

/// Outcome of a single task invocation.
pub type TaskResult = Result<(), BoxError>;

/// Failures while loading or interpreting configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("missing configuration key '{0}'")]
    MissingKey(String),

    #[error("invalid duration '{value}' for '{key}'")]
    InvalidDuration { key: String, value: String },

    #[error("invalid value '{value}' for '{key}': {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}
