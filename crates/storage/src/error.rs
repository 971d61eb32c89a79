//! Store error taxonomy and result alias.
//!
//! Every backend maps its internal failures onto [`StoreError`]. The
//! taxonomy matters to the chain engine's retry controller:
//!
//! - [`StoreError::NotFound`] — the single sentinel, returned when a read
//!   matches zero rows. Consumed by callers to branch, never retried.
//! - [`StoreError::SerializationRestart`] — the backend asked for the
//!   transaction to be replayed (CockroachDB SERIALIZABLE restarts).
//! - [`StoreError::UniqueViolation`] — a unique index rejected a write;
//!   retryable when it is the chain-link index, because two appenders that
//!   read the same tail are a write-skew pair and the loser must re-read.
//! - Everything else is permanent and surfaces with the backend message
//!   intact, because drivers that cannot be classified structurally are
//!   still recognized through substring matching on that message.

use std::sync::Arc;

use thiserror::Error;

/// Name of the unique index on the chain link. A violation of this index is
/// the write-skew signal the retry controller turns into forward progress.
pub const PREV_HASH_INDEX: &str = "idx_name_prev_hash";

/// Name of the unique index on the content hash.
pub const HASH_INDEX: &str = "idx_hash";

/// A boxed error for source-chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors produced by store adapters.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// A read matched zero rows.
    #[error("not found")]
    NotFound,

    /// The backend requested a transaction replay (SERIALIZABLE restart).
    #[error("serialization restart: {message}")]
    SerializationRestart {
        /// The backend's own restart message.
        message: String,
    },

    /// A unique index rejected a write.
    #[error("{message}")]
    UniqueViolation {
        /// Name of the violated constraint.
        constraint: String,
        /// The backend's violation message, preserved verbatim.
        message: String,
    },

    /// Transaction lifecycle misuse or a failed commit/rollback.
    #[error("transaction error: {message}")]
    Transaction {
        /// Description of the failure.
        message: String,
    },

    /// The backend cannot express the requested query shape.
    #[error("unsupported query: {message}")]
    Unsupported {
        /// What was asked of the backend.
        message: String,
    },

    /// Any other backend failure, message preserved verbatim.
    #[error("{message}")]
    Backend {
        /// The backend's message.
        message: String,
        /// The underlying driver error when available.
        #[source]
        source: Option<BoxError>,
    },
}

impl StoreError {
    /// Creates a `SerializationRestart` error.
    #[must_use]
    pub fn serialization_restart(message: impl Into<String>) -> Self {
        Self::SerializationRestart { message: message.into() }
    }

    /// Creates a `UniqueViolation` error.
    #[must_use]
    pub fn unique_violation(constraint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UniqueViolation { constraint: constraint.into(), message: message.into() }
    }

    /// Creates a `Transaction` error.
    #[must_use]
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction { message: message.into() }
    }

    /// Creates an `Unsupported` error.
    #[must_use]
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported { message: message.into() }
    }

    /// Creates a `Backend` error from a message alone.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend { message: message.into(), source: None }
    }

    /// Creates a `Backend` error preserving the driver error as source.
    #[must_use]
    pub fn backend_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Backend { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Returns `true` when replaying the transactional closure may succeed.
    ///
    /// Structured variants are classified directly; `Backend` messages fall
    /// back to the substring patterns CockroachDB is known to emit, so an
    /// unclassified driver still retries correctly.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::SerializationRestart { .. } => true,
            Self::UniqueViolation { constraint, message } => {
                constraint == PREV_HASH_INDEX
                    || message.contains(&format!("violates unique constraint \"{PREV_HASH_INDEX}\""))
            }
            Self::Backend { message, .. } => {
                message.contains("restart transaction")
                    || message.contains("retry transaction")
                    || message.contains(&format!("violates unique constraint \"{PREV_HASH_INDEX}\""))
            }
            _ => false,
        }
    }

    /// Returns `true` for the NotFound sentinel.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}
