//! Error types for cache operations

use thiserror::Error;

/// Main error type for all cache operations
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Key failed the structural check at operation entry
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Single-key fetch reported absence
    #[error("not found: {0}")]
    NotFound(String),

    /// Storage quota exceeded after one cleanup attempt
    #[error("storage full")]
    StorageFull,

    /// Backing store absent or failed to open
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Aggregator found a required reference absent
    #[error("missing required reference '{name}' on item {key}")]
    MissingRef { name: String, key: String },

    /// Aggregator found a required event (or its `by` key) absent
    #[error("missing required event '{name}' on item {key}")]
    MissingEvent { name: String, key: String },

    /// Option validation rejected the configuration
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Upstream API rejected the request
    #[error("api failure: {0}")]
    ApiFailure(String),

    /// Backend storage operation failed
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Wrap a serde_json error
    pub fn serde(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
