//! Error taxonomy for the retrieval and discovery core.
//!
//! Per-candidate problems (a corrupt vector, a dangling reference) are logged and
//! skipped at the call site; only failures that affect a whole request (the store
//! being unreachable) travel back to the caller as a [`KnowledgeError`].

use thiserror::Error;

use crate::knowledge::types::EntityRef;

#[derive(Debug, Error)]
pub enum KnowledgeError {
    /// The external embedding service could not be reached. Recovered inside the
    /// embedder by switching to the hashing fallback.
    #[error("embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// A blob decoded to a vector length outside the supported set.
    #[error("unsupported vector dimension: {found}")]
    DimensionUnsupported { found: usize },

    /// A stored vector cannot be compared with the active query vector.
    #[error("dimension mismatch: stored {stored}, query {query}")]
    DimensionMismatch { stored: usize, query: usize },

    /// Reading or writing the underlying store failed. Retryable.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] rusqlite::Error),

    /// An entity reference resolved to nothing.
    #[error("entity not found: {0}")]
    InvalidReference(EntityRef),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A long-running operation was aborted through its cancel flag.
    #[error("operation cancelled")]
    Cancelled,

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl KnowledgeError {
    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, KnowledgeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::types::EntityType;

    #[test]
    fn only_storage_failures_are_retryable() {
        let storage = KnowledgeError::StorageUnavailable(rusqlite::Error::QueryReturnedNoRows);
        assert!(storage.is_retryable());

        let missing = KnowledgeError::InvalidReference(EntityRef::new(EntityType::Note, 7));
        assert!(!missing.is_retryable());
        assert_eq!(missing.to_string(), "entity not found: note:7");

        assert!(!KnowledgeError::Cancelled.is_retryable());
    }
}
