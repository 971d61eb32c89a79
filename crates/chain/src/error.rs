//! Chain-engine error types.
//!
//! Validation failures carry the exact caller-facing messages of the write
//! path; store failures are wrapped with operation context while keeping
//! the backend message reachable, because the retry predicate classifies
//! through the wrapper.

use patchain_storage::StoreError;
use thiserror::Error;

/// Result alias for chain-engine operations.
pub type ChainResult<T> = Result<T, ChainError>;

/// Errors produced by the chain engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ChainError {
    /// `put` was called with an empty batch.
    #[error("no object to put")]
    NoObjects,

    /// A record in the batch has no owner.
    #[error("object {index}: object does not have an owner")]
    MissingOwner {
        /// Index of the first record without an owner.
        index: usize,
    },

    /// A record in the batch belongs to a different owner than the first.
    #[error("object {index}: has a different owner")]
    OwnerMismatch {
        /// Index of the first diverging record.
        index: usize,
    },

    /// The owner has no partition to append into.
    #[error("owner has no partition")]
    NoPartition,

    /// The chosen partition has no genesis pair; an empty partition is
    /// malformed.
    #[error("no genesis object in the partition")]
    NoGenesis,

    /// A namespaced key could not be split into prefix and name.
    #[error("invalid key format")]
    InvalidKey,

    /// A store failure outside any operation wrapper.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Context wrapper for `put` failures.
    #[error("failed to put object(s): {source}")]
    Put {
        #[source]
        source: Box<ChainError>,
    },

    /// Context wrapper for `create_partitions` failures.
    #[error("failed to create partition(s): {source}")]
    CreatePartitions {
        #[source]
        source: Box<ChainError>,
    },
}

impl ChainError {
    /// Wraps this error with `put` context.
    #[must_use]
    pub(crate) fn wrap_put(self) -> Self {
        Self::Put { source: Box::new(self) }
    }

    /// Wraps this error with `create_partitions` context.
    #[must_use]
    pub(crate) fn wrap_create_partitions(self) -> Self {
        Self::CreatePartitions { source: Box::new(self) }
    }

    /// Returns `true` when replaying the transactional closure may succeed.
    /// Delegates to the store taxonomy, looking through context wrappers.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(err) => err.is_retryable(),
            Self::Put { source } | Self::CreatePartitions { source } => source.is_retryable(),
            _ => false,
        }
    }

    /// Returns `true` when this is the store's NotFound sentinel.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(StoreError::NotFound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_messages_are_exact() {
        assert_eq!(ChainError::NoObjects.to_string(), "no object to put");
        assert_eq!(
            ChainError::MissingOwner { index: 2 }.to_string(),
            "object 2: object does not have an owner"
        );
        assert_eq!(
            ChainError::OwnerMismatch { index: 1 }.to_string(),
            "object 1: has a different owner"
        );
        assert_eq!(ChainError::NoPartition.to_string(), "owner has no partition");
        assert_eq!(ChainError::NoGenesis.to_string(), "no genesis object in the partition");
    }

    #[test]
    fn wrappers_add_operation_context() {
        let err = ChainError::NoPartition.wrap_put();
        assert_eq!(err.to_string(), "failed to put object(s): owner has no partition");

        let err = ChainError::from(StoreError::backend("boom")).wrap_create_partitions();
        assert_eq!(err.to_string(), "failed to create partition(s): boom");
    }

    #[test]
    fn retryability_looks_through_wrappers() {
        let err = ChainError::from(StoreError::backend("restart transaction")).wrap_put();
        assert!(err.is_retryable());

        let err = ChainError::NoGenesis.wrap_put();
        assert!(!err.is_retryable());
    }

    #[test]
    fn not_found_detection() {
        assert!(ChainError::from(StoreError::NotFound).is_not_found());
        assert!(!ChainError::NoPartition.is_not_found());
    }
}
