//! The chained-append engine.
//!
//! [`ChainClient`] drives every ledger write through the store adapter:
//! plain creates, idempotent creates, partition allocation with
//! second-level chaining, and the transactional [`put`](ChainClient::put)
//! that extends a partition's chain under contention.
//!
//! Both `create_partitions` and `put` run their transactional closure under
//! the exponential-backoff harness of [`crate::retry`]: SERIALIZABLE
//! restarts and chain-link unique violations replay the closure, everything
//! else stops the loop and propagates.

use std::sync::Arc;

use patchain_storage::{
    make_chain, now_nanos, transact_with_db, DbHandle, DbOptions, Object, Query, StoreError,
};
use rand::Rng;
use uuid::Uuid;

use crate::{
    error::{ChainError, ChainResult},
    keys::{make_genesis_pair, make_partition_object, PARTITION_PREFIX},
    retry::{with_backoff, BackoffConfig, RetryStats},
};

/// Client for appending records to the ledger.
///
/// Cheap to clone pieces live behind handles; one client may serve any
/// number of concurrent callers.
///
/// # Example
///
/// ```
/// use patchain_chain::ChainClient;
/// use patchain_storage::{DbOptions, MemoryDb, Object};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let client = ChainClient::builder().db(MemoryDb::handle()).build();
/// client.create_partitions(1, "owner-1", "creator-1", &DbOptions::none()).await.unwrap();
///
/// let record = Object { owner_id: "owner-1".into(), key: "doc/a".into(), ..Object::default() };
/// let chained = client.put_one(record, &DbOptions::none()).await.unwrap();
/// assert!(!chained.hash.is_empty());
/// # });
/// ```
pub struct ChainClient {
    db: DbHandle,
    backoff: BackoffConfig,
    stats: Arc<RetryStats>,
}

#[bon::bon]
impl ChainClient {
    /// Creates a new chain client over a store handle.
    #[builder]
    pub fn new(db: DbHandle, #[builder(default)] backoff: BackoffConfig) -> Self {
        Self { db, backoff, stats: Arc::new(RetryStats::new()) }
    }

    /// The underlying store handle.
    #[must_use]
    pub fn db(&self) -> &DbHandle {
        &self.db
    }

    /// Retry counters for this client's write operations.
    #[must_use]
    pub fn retry_stats(&self) -> &RetryStats {
        &self.stats
    }

    /// Initializes, hashes and inserts one record.
    ///
    /// Duplicate `key` values are allowed; only the content hash and the
    /// chain link are unique.
    pub async fn create(&self, obj: &mut Object, opts: &DbOptions) -> ChainResult<()> {
        obj.init().compute_hash();
        self.db.create(obj, opts).await?;
        Ok(())
    }

    /// Creates the record only when no record shares its `key`; otherwise
    /// overwrites the argument with the stored record and succeeds.
    ///
    /// Not atomic with respect to concurrent `create_once` calls on the
    /// same key — callers relying on key uniqueness must not rely on this
    /// primitive alone.
    pub async fn create_once(&self, obj: &mut Object, opts: &DbOptions) -> ChainResult<()> {
        match self.get_last(Query::new().key(obj.key.clone()), opts).await {
            Ok(existing) => {
                *obj = existing;
                Ok(())
            }
            Err(err) if err.is_not_found() => self.create(obj, opts).await,
            Err(err) => Err(err),
        }
    }

    /// Returns the most recent record matching `query`, enforcing the
    /// timestamp-descending tie-break.
    pub async fn get_last(&self, query: Query, opts: &DbOptions) -> ChainResult<Object> {
        Ok(self.db.get_last(&query.newest_first(), opts).await?)
    }

    /// Returns every record matching `query`.
    pub async fn all(&self, query: Query, opts: &DbOptions) -> ChainResult<Vec<Object>> {
        Ok(self.db.get_all(&query, opts).await?)
    }

    /// Appends `n` partition markers to the global partition chain, each
    /// with its genesis pair, atomically.
    ///
    /// Markers chain among themselves and onto the previous last marker;
    /// the very first marker anchors to `SHA256(id)`. Returns the created
    /// markers. `n = 0` is a no-op.
    pub async fn create_partitions(
        &self,
        n: u64,
        owner_id: &str,
        creator_id: &str,
        opts: &DbOptions,
    ) -> ChainResult<Vec<Object>> {
        if n == 0 {
            return Ok(Vec::new());
        }

        let db = Arc::clone(&self.db);
        let opts = opts.clone();
        let owner_id = owner_id.to_string();
        let creator_id = creator_id.to_string();

        with_backoff(&self.backoff, Some(&self.stats), "create_partitions", move |stopper| {
            let db = Arc::clone(&db);
            let opts = opts.clone();
            let owner_id = owner_id.clone();
            let creator_id = creator_id.clone();
            async move {
                let result = create_partitions_attempt(db, opts, n, owner_id, creator_id).await;
                if let Err(err) = &result {
                    if !err.is_retryable() {
                        stopper.stop();
                    }
                }
                result
            }
        })
        .await
        .map_err(ChainError::wrap_create_partitions)
    }

    /// Atomically appends records to one partition of their common owner.
    ///
    /// The partition is chosen uniformly at random among the owner's
    /// partitions; the records are chained onto the partition's tail and
    /// the former tail's `peer_hash` is bound forward. Concurrent callers
    /// that read the same tail are serialized by the chain-link unique
    /// index: one commits, the others replay under backoff.
    ///
    /// Returns the chained records as committed.
    pub async fn put(&self, objects: Vec<Object>, opts: &DbOptions) -> ChainResult<Vec<Object>> {
        if objects.is_empty() {
            return Err(ChainError::NoObjects);
        }
        let owner_id = objects[0].owner_id.clone();
        for (index, obj) in objects.iter().enumerate() {
            if obj.owner_id.is_empty() {
                return Err(ChainError::MissingOwner { index });
            }
            if obj.owner_id != owner_id {
                return Err(ChainError::OwnerMismatch { index });
            }
        }

        let db = Arc::clone(&self.db);
        let opts = opts.clone();

        with_backoff(&self.backoff, Some(&self.stats), "put", move |stopper| {
            let db = Arc::clone(&db);
            let opts = opts.clone();
            let owner_id = owner_id.clone();
            let objects = objects.clone();
            async move {
                let result = put_attempt(db, opts, owner_id, objects).await;
                if let Err(err) = &result {
                    if !err.is_retryable() {
                        stopper.stop();
                    }
                }
                result
            }
        })
        .await
        .map_err(ChainError::wrap_put)
    }

    /// [`put`](ChainClient::put) for a single record.
    pub async fn put_one(&self, object: Object, opts: &DbOptions) -> ChainResult<Object> {
        let mut chained = self.put(vec![object], opts).await?;
        // put() never returns an empty batch on success.
        chained.pop().ok_or(ChainError::NoObjects)
    }
}

/// Resolves the transaction to run on: the caller's when supplied through
/// the options, otherwise a fresh one that this operation finishes itself.
async fn resolve_tx(db: &DbHandle, opts: &DbOptions) -> ChainResult<(DbHandle, bool)> {
    match &opts.use_db {
        Some(use_db) => Ok((Arc::clone(&use_db.db), use_db.finish)),
        None => Ok((db.begin().await?, true)),
    }
}

/// One transactional attempt of `create_partitions`.
async fn create_partitions_attempt(
    db: DbHandle,
    opts: DbOptions,
    n: u64,
    owner_id: String,
    creator_id: String,
) -> ChainResult<Vec<Object>> {
    let (tx, finish) = resolve_tx(&db, &opts).await?;
    transact_with_db(tx, finish, move |tx| {
        Box::pin(async move {
            let mut markers: Vec<Object> = (0..n)
                .map(|_| {
                    make_partition_object(&Uuid::new_v4().to_string(), &owner_id, &creator_id)
                })
                .collect();

            let last = match tx
                .get_last(
                    &Query::new().key_starts_with(PARTITION_PREFIX).newest_first(),
                    &DbOptions::none(),
                )
                .await
            {
                Ok(last) => Some(last),
                Err(StoreError::NotFound) => None,
                Err(err) => return Err(err.into()),
            };

            // Stamp past the previous last marker so the marker chain stays
            // timestamp-ordered; each marker reserves two slots for its
            // genesis pair.
            let base = now_nanos().max(last.as_ref().map_or(0, |l| l.timestamp + 1));
            for (i, marker) in markers.iter_mut().enumerate() {
                marker.timestamp = base + (i as i64) * 3;
            }
            if let Some(last) = &last {
                markers[0].prev_hash = last.hash.clone();
            }
            make_chain(&mut markers);

            let mut batch = markers.clone();
            for marker in &markers {
                let mut pair =
                    make_genesis_pair(&owner_id, &creator_id, &marker.id, &marker.hash);
                pair[0].timestamp = marker.timestamp + 1;
                pair[1].timestamp = marker.timestamp + 2;
                make_chain(&mut pair);
                batch.extend(pair);
            }

            tx.create_bulk(&batch, &DbOptions::none()).await?;
            Ok(markers)
        })
    })
    .await
}

/// One transactional attempt of `put`.
async fn put_attempt(
    db: DbHandle,
    opts: DbOptions,
    owner_id: String,
    mut objects: Vec<Object>,
) -> ChainResult<Vec<Object>> {
    let (tx, finish) = resolve_tx(&db, &opts).await?;
    transact_with_db(tx, finish, move |tx| {
        Box::pin(async move {
            let partitions = tx
                .get_all(
                    &Query::new().owner(owner_id.clone()).key_starts_with(PARTITION_PREFIX),
                    &DbOptions::none(),
                )
                .await?;
            if partitions.is_empty() {
                return Err(ChainError::NoPartition);
            }

            // Uniform over the full set; result ordering carries no meaning.
            let pick = rand::rng().random_range(0..partitions.len());
            let chosen = partitions[pick].clone();
            tracing::debug!(partition_id = %chosen.id, records = objects.len(), "appending");

            for obj in &mut objects {
                obj.partition_id = chosen.id.clone();
            }

            let tail = match tx
                .get_last(&Query::new().partition(chosen.id.clone()).newest_first(), &DbOptions::none())
                .await
            {
                Ok(tail) => tail,
                Err(StoreError::NotFound) => return Err(ChainError::NoGenesis),
                Err(err) => return Err(err.into()),
            };

            // Keep the partition timestamp-ordered: every record must stamp
            // past the observed tail, ascending within the batch, even when
            // this attempt is a replay after a lost race.
            let mut floor = tail.timestamp;
            for obj in &mut objects {
                obj.init();
                if obj.timestamp <= floor {
                    obj.timestamp = now_nanos().max(floor + 1);
                }
                floor = obj.timestamp;
            }

            objects[0].prev_hash = tail.hash.clone();
            make_chain(&mut objects);

            // Bind the former tail forward; the one permitted in-place
            // mutation of committed data.
            let mut former = tail.clone();
            former.compute_peer_hash(&objects[0].hash);
            tx.update_peer_hash(&tail, &former.peer_hash, &DbOptions::none()).await?;

            for obj in &objects {
                tx.create(obj, &DbOptions::none()).await?;
            }
            Ok(objects)
        })
    })
    .await
}
