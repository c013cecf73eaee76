use thiserror::Error;

/// Errors from the external key-value store contract.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backing store error: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}
