//! Shared test utilities for store and chain-engine testing.
//!
//! Feature-gated behind `testutil`; enable from `[dev-dependencies]`:
//!
//! ```toml
//! [dev-dependencies]
//! patchain-storage = { path = "../storage", features = ["testutil"] }
//! ```

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;

use crate::{
    backend::{Db, DbHandle, DbOptions},
    error::{StoreError, StoreResult},
    object::Object,
    query::Query,
};

/// Builds an initialized, hashed record for `owner` under `key`.
#[must_use]
pub fn make_record(owner: &str, key: &str) -> Object {
    let mut obj = Object {
        owner_id: owner.to_string(),
        creator_id: owner.to_string(),
        key: key.to_string(),
        ..Object::default()
    };
    obj.init().compute_hash();
    obj
}

/// Builds `count` bare (un-initialized) records for `owner`, keyed
/// `prefix/0` … `prefix/count-1`, ready to hand to the chain engine.
#[must_use]
pub fn make_batch(owner: &str, prefix: &str, count: usize) -> Vec<Object> {
    (0..count)
        .map(|i| Object {
            owner_id: owner.to_string(),
            creator_id: owner.to_string(),
            key: format!("{prefix}/{i}"),
            ..Object::default()
        })
        .collect()
}

/// A [`Db`] wrapper that fails the first `n` `create` calls with a
/// retryable restart error, then behaves normally.
///
/// The failure budget is shared with every transaction handle the wrapper
/// begets, so faults can be injected inside transactional closures. Used to
/// drive the retry controller deterministically.
pub struct FlakyDb {
    inner: DbHandle,
    failures: Arc<AtomicUsize>,
}

impl FlakyDb {
    /// Wraps `inner`, injecting `n` create failures.
    #[must_use]
    pub fn new(inner: DbHandle, n: usize) -> Self {
        Self { inner, failures: Arc::new(AtomicUsize::new(n)) }
    }

    /// Remaining injected failures.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    /// Consumes one failure from the budget when any remain.
    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Db for FlakyDb {
    async fn create(&self, obj: &Object, opts: &DbOptions) -> StoreResult<()> {
        if self.take_failure() {
            return Err(StoreError::backend("restart transaction: injected fault"));
        }
        self.inner.create(obj, opts).await
    }

    async fn create_bulk(&self, objs: &[Object], opts: &DbOptions) -> StoreResult<()> {
        if self.take_failure() {
            return Err(StoreError::backend("restart transaction: injected fault"));
        }
        self.inner.create_bulk(objs, opts).await
    }

    async fn count(&self, query: &Query, opts: &DbOptions) -> StoreResult<i64> {
        self.inner.count(query, opts).await
    }

    async fn get_last(&self, query: &Query, opts: &DbOptions) -> StoreResult<Object> {
        self.inner.get_last(query, opts).await
    }

    async fn get_all(&self, query: &Query, opts: &DbOptions) -> StoreResult<Vec<Object>> {
        self.inner.get_all(query, opts).await
    }

    async fn update_peer_hash(
        &self,
        obj: &Object,
        new_peer_hash: &str,
        opts: &DbOptions,
    ) -> StoreResult<()> {
        self.inner.update_peer_hash(obj, new_peer_hash, opts).await
    }

    async fn begin(&self) -> StoreResult<DbHandle> {
        let tx = self.inner.begin().await?;
        Ok(Arc::new(FlakyDb { inner: tx, failures: Arc::clone(&self.failures) }))
    }

    async fn commit(&self) -> StoreResult<()> {
        self.inner.commit().await
    }

    async fn rollback(&self) -> StoreResult<()> {
        self.inner.rollback().await
    }

    async fn create_tables(&self) -> StoreResult<()> {
        self.inner.create_tables().await
    }

    async fn close(&self) -> StoreResult<()> {
        self.inner.close().await
    }
}

/// Asserts that a result is the [`StoreError::NotFound`] sentinel.
#[macro_export]
macro_rules! assert_not_found {
    ($result:expr) => {
        match &$result {
            Err(err) if err.is_not_found() => {}
            other => panic!("expected StoreError::NotFound, got: {other:?}"),
        }
    };
}
