use reimburse_core::ModelError;
use thiserror::Error;

/// Errors returned by the formula fitter.
#[derive(Debug, Error)]
pub enum TrainerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("record {index}: {reason}")]
    InvalidRecord { index: usize, reason: String },

    #[error("dataset contains no valid examples")]
    EmptyDataset,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("configuration is not valid TOML: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Result type for trainer operations
pub type Result<T> = std::result::Result<T, TrainerError>;
