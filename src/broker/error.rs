use thiserror::Error;

pub type ChannelResult<T> = Result<T, ChannelError>;

/// Errors raised by the message channel
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel unavailable: {0}")]
    Unavailable(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown or already settled delivery: {0}")]
    UnknownDelivery(String),
}

impl ChannelError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// True for failures that mean the connection itself is gone
    pub fn is_connection_failure(&self) -> bool {
        match self {
            ChannelError::Unavailable(_) => true,
            ChannelError::Redis(e) => {
                e.is_io_error()
                    || e.is_connection_dropped()
                    || e.is_connection_refusal()
                    || e.is_timeout()
            }
            ChannelError::Json(_) | ChannelError::UnknownDelivery(_) => false,
        }
    }
}
