use thiserror::Error;

/// Infrastructure errors raised by stores, configuration and codecs.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Record store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// True for failures of the backing store rather than of the caller.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, AppError::Redis(_) | AppError::StoreUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
