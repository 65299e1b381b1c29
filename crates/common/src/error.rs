use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShieldError {
    #[error("invalid value {value:?} for environment variable {var}")]
    InvalidEnv { var: String, value: String },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type ShieldResult<T> = Result<T, ShieldError>;
