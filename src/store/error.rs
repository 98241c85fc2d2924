//! Storage error types

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying I/O failed
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value could not be decoded (or encoded)
    #[error("corrupt value for key {key}: {reason}")]
    Corrupt {
        /// Key whose value is unusable
        key: String,
        /// Decoder message
        reason: String,
    },
}

impl StoreError {
    pub(crate) fn corrupt(key: &str, reason: impl std::fmt::Display) -> Self {
        StoreError::Corrupt {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}
