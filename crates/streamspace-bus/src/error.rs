use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("message of {0} bytes exceeds the 1 MiB bus limit")]
    MessageTooLarge(usize),

    #[error("failed to encode message: {0}")]
    Encode(serde_json::Error),

    #[error("failed to decode message: {0}")]
    Decode(serde_json::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("bus is shutting down")]
    Closed,
}
