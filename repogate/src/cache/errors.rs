use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    /// No key-value connection is configured
    #[error("Cache unavailable: no connection configured")]
    Unavailable,

    /// The backend rejected or failed the command
    #[error("Cache backend error: {0}")]
    Backend(String),

    /// A stored value was not valid JSON
    #[error("Failed to decode cached value: {0}")]
    Decode(#[from] serde_json::Error),

    /// A hash-field write named a field the filter does not carry
    #[error("Filter has no field '{0}' to partition by")]
    MissingField(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Backend(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
