//! Store adapter trait definition.
//!
//! [`Db`] is the abstraction every backend implements: strongly-typed
//! operations over the `objects` table plus a transaction lifecycle. A
//! handle is either pool-backed (the default connection) or
//! transaction-backed — [`Db::begin`] returns a new handle of the latter
//! kind, and all operations run on whichever handle they are invoked on.
//!
//! # Threading a transaction through operations
//!
//! Callers that already hold a transaction pass it via [`DbOptions`]: an
//! operation receiving options runs on [`UseDb::db`] when present and falls
//! back to its own connection otherwise. This is how the chain engine keeps
//! a multi-read-multi-write sequence atomic while reusing the plain
//! operation set.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{error::StoreResult, object::Object, query::Query};

/// Shared handle to a store adapter (pool- or transaction-backed).
pub type DbHandle = Arc<dyn Db>;

/// Directs an operation onto an existing transaction.
#[derive(Clone)]
pub struct UseDb {
    /// The transaction-backed handle to run on.
    pub db: DbHandle,
    /// Whether the helper driving this transaction should auto-finish it
    /// (commit on success, rollback on error) once the closure returns.
    pub finish: bool,
}

/// Option record accompanying every store operation.
///
/// Unknown extensions arrive as new named fields; absent fields mean the
/// operation uses its own connection.
#[derive(Clone, Default)]
pub struct DbOptions {
    /// Run the operation on this transaction instead of the default
    /// connection.
    pub use_db: Option<UseDb>,
}

impl DbOptions {
    /// Options that run the operation on the handle's own connection.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Options that run the operation on `db`, leaving transaction
    /// finishing to the caller.
    #[must_use]
    pub fn with_tx(db: DbHandle) -> Self {
        Self { use_db: Some(UseDb { db, finish: false }) }
    }

    /// Options that run the operation on `db` with an explicit finish flag.
    #[must_use]
    pub fn with_tx_finish(db: DbHandle, finish: bool) -> Self {
        Self { use_db: Some(UseDb { db, finish }) }
    }

    /// The transaction to run on, when one was supplied.
    #[must_use]
    pub fn tx(&self) -> Option<DbHandle> {
        self.use_db.as_ref().map(|u| Arc::clone(&u.db))
    }
}

/// Strongly-typed operations over the `objects` table.
///
/// Implementations must be thread-safe; transaction-backed handles are
/// short-lived and used by one logical caller at a time. Failures surface
/// intact — in particular unique-index violations and SERIALIZABLE restarts
/// reach the caller as their structured [`StoreError`](crate::StoreError)
/// variants so the retry controller can classify them.
#[async_trait]
pub trait Db: Send + Sync {
    /// Inserts one record. Duplicate `key` values are allowed; only the
    /// chain-link and content-hash indexes are unique.
    async fn create(&self, obj: &Object, opts: &DbOptions) -> StoreResult<()>;

    /// Inserts several records in order.
    async fn create_bulk(&self, objs: &[Object], opts: &DbOptions) -> StoreResult<()>;

    /// Counts the records matching `query`.
    async fn count(&self, query: &Query, opts: &DbOptions) -> StoreResult<i64>;

    /// Returns the single most recent record matching `query`, or
    /// [`StoreError::NotFound`](crate::StoreError::NotFound) when no row
    /// matches.
    async fn get_last(&self, query: &Query, opts: &DbOptions) -> StoreResult<Object>;

    /// Returns every record matching `query`.
    async fn get_all(&self, query: &Query, opts: &DbOptions) -> StoreResult<Vec<Object>>;

    /// Updates `peer_hash` on the record identified by `obj.id`, or
    /// returns [`StoreError::NotFound`](crate::StoreError::NotFound) when
    /// no such record exists.
    ///
    /// This is the sole permitted in-place mutation of committed data,
    /// performed only on a formerly-tail record while a new tail is being
    /// appended.
    async fn update_peer_hash(
        &self,
        obj: &Object,
        new_peer_hash: &str,
        opts: &DbOptions,
    ) -> StoreResult<()>;

    /// Opens a transaction and returns a handle scoped to it.
    async fn begin(&self) -> StoreResult<DbHandle>;

    /// Commits the handle's transaction. A no-op when the transaction has
    /// already been finished; an error on a pool-backed handle.
    async fn commit(&self) -> StoreResult<()>;

    /// Rolls back the handle's transaction. A no-op when the transaction
    /// has already been finished; an error on a pool-backed handle.
    async fn rollback(&self) -> StoreResult<()>;

    /// Creates the `objects` table and its indexes when absent. Probes the
    /// catalog itself and never drops or alters columns destructively.
    async fn create_tables(&self) -> StoreResult<()>;

    /// Closes the underlying backend resource. Subsequent operations fail.
    async fn close(&self) -> StoreResult<()>;
}
