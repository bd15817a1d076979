use thiserror::Error;

/// Errors produced by the WikiPulse engine.
#[derive(Error, Debug)]
pub enum PulseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Store call timed out: {0}")]
    StoreTimeout(String),

    #[error("Log error: {0}")]
    Log(String),

    #[error("Upstream stream error: {0}")]
    Upstream(String),

    #[error("Capacity exhausted: {0}")]
    Capacity(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PulseError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Store(_) | Self::StoreTimeout(_) | Self::Log(_) | Self::Upstream(_)
        )
    }
}

impl From<redis::RedisError> for PulseError {
    fn from(err: redis::RedisError) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<rdkafka::error::KafkaError> for PulseError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        Self::Log(err.to_string())
    }
}

impl From<reqwest::Error> for PulseError {
    fn from(err: reqwest::Error) -> Self {
        Self::Upstream(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PulseError>;
