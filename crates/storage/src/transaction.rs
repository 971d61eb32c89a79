//! Transaction-driving helpers.
//!
//! [`transact`] opens a transaction, runs a closure on it and finishes it:
//! commit when the closure succeeds, rollback when it fails. A closure may
//! finish the transaction itself through the handle it receives — both
//! backends treat finishing an already finished transaction as a no-op, so
//! the automatic pass is safe either way.
//!
//! [`transact_with_db`] is the same discipline over a caller-supplied
//! transaction, with `finish` deciding whether the helper closes it at all.
//! The chain engine uses this to honor an externally threaded transaction
//! whose lifetime belongs to the caller.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::{
    backend::{Db, DbHandle},
    error::StoreError,
};

/// Opens a transaction on `db`, runs `f` and finishes the transaction.
pub async fn transact<T, E, F>(db: &dyn Db, f: F) -> Result<T, E>
where
    E: From<StoreError>,
    F: FnOnce(DbHandle) -> BoxFuture<'static, Result<T, E>>,
{
    let tx = db.begin().await?;
    transact_with_db(tx, true, f).await
}

/// Runs `f` on the supplied transaction handle.
///
/// When `finish` is set, the transaction is committed on success and rolled
/// back on failure after `f` returns. A failing commit or rollback takes
/// precedence over the closure's own result and propagates **unwrapped** —
/// a commit can surface the SERIALIZABLE restart or the chain-link unique
/// violation, and the retry controller must still recognize it.
pub async fn transact_with_db<T, E, F>(tx: DbHandle, finish: bool, f: F) -> Result<T, E>
where
    E: From<StoreError>,
    F: FnOnce(DbHandle) -> BoxFuture<'static, Result<T, E>>,
{
    let result = f(Arc::clone(&tx)).await;
    if finish {
        match &result {
            Ok(_) => {
                if let Err(err) = tx.commit().await {
                    return Err(E::from(err));
                }
            }
            Err(_) => {
                if let Err(err) = tx.rollback().await {
                    return Err(E::from(err));
                }
            }
        }
    }
    result
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{
        backend::DbOptions,
        error::StoreResult,
        memory::MemoryDb,
        object::Object,
        query::Query,
    };

    fn record(key: &str) -> Object {
        let mut obj = Object { owner_id: "o".into(), key: key.into(), ..Object::default() };
        obj.init().compute_hash();
        obj
    }

    #[tokio::test]
    async fn transact_commits_on_success() {
        let db = MemoryDb::new();
        let obj = record("k1");

        let result: StoreResult<()> = transact(&db, move |tx| {
            Box::pin(async move { tx.create(&obj, &DbOptions::none()).await })
        })
        .await;
        result.unwrap();

        assert_eq!(db.count(&Query::new().key("k1"), &DbOptions::none()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn transact_rolls_back_on_error() {
        let db = MemoryDb::new();
        let obj = record("k1");

        let result: StoreResult<()> = transact(&db, move |tx| {
            Box::pin(async move {
                tx.create(&obj, &DbOptions::none()).await?;
                Err(StoreError::backend("boom"))
            })
        })
        .await;
        assert!(result.is_err());

        assert_eq!(db.count(&Query::new().key("k1"), &DbOptions::none()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn closure_may_finish_the_transaction_itself() {
        let db = MemoryDb::new();
        let obj = record("k1");

        let result: StoreResult<()> = transact(&db, move |tx| {
            Box::pin(async move {
                tx.create(&obj, &DbOptions::none()).await?;
                tx.commit().await
            })
        })
        .await;
        result.unwrap();

        assert_eq!(db.count(&Query::new().key("k1"), &DbOptions::none()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn commit_conflicts_propagate_unwrapped() {
        // A rival committing the same chain link between the closure and
        // the automatic commit must surface as the retryable violation,
        // not as a generic transaction failure.
        let db = MemoryDb::new();
        let rival = record("k-rival");
        let mut loser = record("k-loser");
        loser.prev_hash = rival.prev_hash.clone();
        loser.compute_hash();

        let rival_for_closure = rival.clone();
        let db_for_closure = db.clone();
        let result: StoreResult<()> = transact(&db, move |tx| {
            Box::pin(async move {
                tx.create(&loser, &DbOptions::none()).await?;
                // The rival commits outside the transaction first.
                db_for_closure.create(&rival_for_closure, &DbOptions::none()).await
            })
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.is_retryable(), "commit conflict must keep its retry signal: {err}");
    }

    #[tokio::test]
    async fn caller_owned_transaction_is_left_open() {
        let db = MemoryDb::new();
        let tx = db.begin().await.unwrap();
        let obj = record("k1");

        let handle = Arc::clone(&tx);
        let result: StoreResult<()> = transact_with_db(handle, false, move |tx| {
            Box::pin(async move { tx.create(&obj, &DbOptions::none()).await })
        })
        .await;
        result.unwrap();

        // Not committed yet; the record is invisible outside the transaction.
        assert_eq!(db.count(&Query::new().key("k1"), &DbOptions::none()).await.unwrap(), 0);

        tx.commit().await.unwrap();
        assert_eq!(db.count(&Query::new().key("k1"), &DbOptions::none()).await.unwrap(), 1);
    }
}
