use thiserror::Error;

/// Errors raised by the content store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No object is stored under the given digest.
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("storage IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The digest string is not 64 hex characters.
    #[error("invalid content hash: {0}")]
    InvalidHash(String),

    /// The object grew past the store's ceiling while being written.
    #[error("object exceeds size limit ({actual} > {limit} bytes)")]
    SizeLimitExceeded { actual: u64, limit: u64 },
}

impl StorageError {
    /// Whether a caller may reasonably retry the same operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
