//! In-memory store adapter.
//!
//! [`MemoryDb`] implements [`Db`] over a `parking_lot`-guarded append-only
//! table. It is the reference backend for tests and development, and it
//! enforces the same constraints the production schema does:
//!
//! - `idx_hash` — unique content hash,
//! - `idx_name_prev_hash` — unique `(partition_id, prev_hash)` chain link,
//!
//! with CockroachDB-style violation messages, so retry-predicate behavior
//! is identical across backends.
//!
//! # Transactions
//!
//! [`MemoryDb::begin`] returns a handle that buffers creates and peer-hash
//! updates with read-your-writes semantics. Constraints are re-validated
//! against committed state at commit time under one lock: of two
//! transactions that read the same chain tail, the second to commit fails
//! with the chain-link violation — exactly the contention signal the chain
//! engine's retry controller consumes.
//!
//! # Limitations
//!
//! - Data is not persisted.
//! - Raw query expressions require a SQL backend and are rejected.
//! - Explicit `order_by` clauses are only understood for
//!   `timestamp asc` / `timestamp desc`.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    backend::{Db, DbHandle, DbOptions},
    error::{StoreError, StoreResult, HASH_INDEX, PREV_HASH_INDEX},
    object::Object,
    query::Query,
};

/// Direction of a timestamp ordering.
#[derive(Clone, Copy, PartialEq)]
enum Order {
    TimestampAsc,
    TimestampDesc,
}

/// Committed table state shared by a [`MemoryDb`] and its transactions.
struct Table {
    rows: Vec<Object>,
    closed: bool,
}

impl Table {
    /// Validates `candidate` against committed rows plus `staged` rows that
    /// would commit ahead of it.
    fn check_constraints(&self, candidate: &Object, staged: &[Object]) -> StoreResult<()> {
        let conflict = |other: &Object| -> StoreResult<()> {
            if other.hash == candidate.hash {
                return Err(StoreError::unique_violation(
                    HASH_INDEX,
                    format!("duplicate key value violates unique constraint \"{HASH_INDEX}\""),
                ));
            }
            if other.partition_id == candidate.partition_id
                && other.prev_hash == candidate.prev_hash
            {
                return Err(StoreError::unique_violation(
                    PREV_HASH_INDEX,
                    format!(
                        "duplicate key value violates unique constraint \"{PREV_HASH_INDEX}\""
                    ),
                ));
            }
            Ok(())
        };
        for row in self.rows.iter().chain(staged) {
            conflict(row)?;
        }
        Ok(())
    }

    fn guard_open(&self) -> StoreResult<()> {
        if self.closed {
            return Err(StoreError::backend("database is closed"));
        }
        Ok(())
    }
}

/// Evaluates the equality / key-prefix predicates of `query` on one record.
fn matches(query: &Query, obj: &Object) -> StoreResult<bool> {
    if query.raw_expr().is_some() {
        return Err(StoreError::unsupported(
            "raw expressions require a SQL backend",
        ));
    }
    for (field, value) in query.equalities() {
        if field.value_of(obj) != *value {
            return Ok(false);
        }
    }
    if let Some(prefix) = query.key_prefix() {
        if !obj.key.starts_with(prefix) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Resolves the effective ordering per the query composition rules.
fn effective_order(query: &Query) -> StoreResult<Order> {
    if query.is_newest_first() {
        return Ok(Order::TimestampDesc);
    }
    match query.explicit_order() {
        None => Ok(Order::TimestampDesc),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "timestamp asc" | "\"timestamp\" asc" => Ok(Order::TimestampAsc),
            "timestamp desc" | "\"timestamp\" desc" => Ok(Order::TimestampDesc),
            other => Err(StoreError::unsupported(format!(
                "order clause {other:?} is not understood by the memory backend"
            ))),
        },
    }
}

/// Filters, orders and limits a snapshot. Insertion order breaks timestamp
/// ties so tail resolution stays deterministic.
fn evaluate(query: &Query, snapshot: &[Object]) -> StoreResult<Vec<Object>> {
    let order = effective_order(query)?;
    let mut hits: Vec<(usize, Object)> = Vec::new();
    for (seq, obj) in snapshot.iter().enumerate() {
        if matches(query, obj)? {
            hits.push((seq, obj.clone()));
        }
    }
    hits.sort_by(|(seq_a, a), (seq_b, b)| match order {
        Order::TimestampAsc => a.timestamp.cmp(&b.timestamp).then(seq_a.cmp(seq_b)),
        Order::TimestampDesc => b.timestamp.cmp(&a.timestamp).then(seq_b.cmp(seq_a)),
    });
    let mut out: Vec<Object> = hits.into_iter().map(|(_, obj)| obj).collect();
    if query.get_limit() > 0 && out.len() as i64 > query.get_limit() {
        out.truncate(query.get_limit() as usize);
    }
    Ok(out)
}

/// In-memory [`Db`] implementation.
///
/// Cheaply cloneable; all clones share the same table.
#[derive(Clone)]
pub struct MemoryDb {
    table: Arc<Mutex<Table>>,
}

impl MemoryDb {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self { table: Arc::new(Mutex::new(Table { rows: Vec::new(), closed: false })) }
    }

    /// Creates an empty store behind a [`DbHandle`].
    #[must_use]
    pub fn handle() -> DbHandle {
        Arc::new(Self::new())
    }

    /// Snapshot of every committed record, in insertion order.
    #[must_use]
    pub fn dump(&self) -> Vec<Object> {
        self.table.lock().rows.clone()
    }
}

impl Default for MemoryDb {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Db for MemoryDb {
    async fn create(&self, obj: &Object, opts: &DbOptions) -> StoreResult<()> {
        if let Some(tx) = opts.tx() {
            return tx.create(obj, &DbOptions::none()).await;
        }
        let mut table = self.table.lock();
        table.guard_open()?;
        table.check_constraints(obj, &[])?;
        table.rows.push(obj.clone());
        Ok(())
    }

    async fn create_bulk(&self, objs: &[Object], opts: &DbOptions) -> StoreResult<()> {
        if let Some(tx) = opts.tx() {
            return tx.create_bulk(objs, &DbOptions::none()).await;
        }
        let mut table = self.table.lock();
        table.guard_open()?;
        for (i, obj) in objs.iter().enumerate() {
            table.check_constraints(obj, &objs[..i])?;
        }
        table.rows.extend(objs.iter().cloned());
        Ok(())
    }

    async fn count(&self, query: &Query, opts: &DbOptions) -> StoreResult<i64> {
        if let Some(tx) = opts.tx() {
            return tx.count(query, &DbOptions::none()).await;
        }
        let table = self.table.lock();
        table.guard_open()?;
        let mut n = 0i64;
        for obj in &table.rows {
            if matches(query, obj)? {
                n += 1;
            }
        }
        Ok(n)
    }

    async fn get_last(&self, query: &Query, opts: &DbOptions) -> StoreResult<Object> {
        if let Some(tx) = opts.tx() {
            return tx.get_last(query, &DbOptions::none()).await;
        }
        let narrowed = query.clone().newest_first().limit(1);
        let table = self.table.lock();
        table.guard_open()?;
        evaluate(&narrowed, &table.rows)?.into_iter().next().ok_or(StoreError::NotFound)
    }

    async fn get_all(&self, query: &Query, opts: &DbOptions) -> StoreResult<Vec<Object>> {
        if let Some(tx) = opts.tx() {
            return tx.get_all(query, &DbOptions::none()).await;
        }
        let table = self.table.lock();
        table.guard_open()?;
        evaluate(query, &table.rows)
    }

    async fn update_peer_hash(
        &self,
        obj: &Object,
        new_peer_hash: &str,
        opts: &DbOptions,
    ) -> StoreResult<()> {
        if let Some(tx) = opts.tx() {
            return tx.update_peer_hash(obj, new_peer_hash, &DbOptions::none()).await;
        }
        let mut table = self.table.lock();
        table.guard_open()?;
        let row = table
            .rows
            .iter_mut()
            .find(|row| row.id == obj.id)
            .ok_or(StoreError::NotFound)?;
        row.peer_hash = new_peer_hash.to_string();
        Ok(())
    }

    async fn begin(&self) -> StoreResult<DbHandle> {
        self.table.lock().guard_open()?;
        Ok(Arc::new(MemoryTx {
            db: self.clone(),
            pending: Mutex::new(Some(Pending::default())),
        }))
    }

    async fn commit(&self) -> StoreResult<()> {
        Err(StoreError::transaction("connection is not a transaction"))
    }

    async fn rollback(&self) -> StoreResult<()> {
        Err(StoreError::transaction("connection is not a transaction"))
    }

    async fn create_tables(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        self.table.lock().closed = true;
        Ok(())
    }
}

/// Writes buffered by a [`MemoryTx`] until commit.
#[derive(Default)]
struct Pending {
    creates: Vec<Object>,
    peer_updates: Vec<(String, String)>,
}

/// Transaction-backed handle over a [`MemoryDb`].
struct MemoryTx {
    db: MemoryDb,
    pending: Mutex<Option<Pending>>,
}

impl MemoryTx {
    /// Committed rows with this transaction's writes applied on top.
    fn snapshot(&self, pending: &Pending) -> StoreResult<Vec<Object>> {
        let table = self.db.table.lock();
        table.guard_open()?;
        let mut rows = table.rows.clone();
        drop(table);
        for (id, peer_hash) in &pending.peer_updates {
            if let Some(row) = rows.iter_mut().find(|row| &row.id == id) {
                row.peer_hash = peer_hash.clone();
            }
        }
        rows.extend(pending.creates.iter().cloned());
        Ok(rows)
    }

    fn with_pending<T>(
        &self,
        f: impl FnOnce(&mut Pending) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut guard = self.pending.lock();
        match guard.as_mut() {
            Some(pending) => f(pending),
            None => Err(StoreError::transaction("transaction already finished")),
        }
    }
}

#[async_trait]
impl Db for MemoryTx {
    async fn create(&self, obj: &Object, _opts: &DbOptions) -> StoreResult<()> {
        self.with_pending(|pending| {
            let table = self.db.table.lock();
            table.guard_open()?;
            table.check_constraints(obj, &pending.creates)?;
            drop(table);
            pending.creates.push(obj.clone());
            Ok(())
        })
    }

    async fn create_bulk(&self, objs: &[Object], _opts: &DbOptions) -> StoreResult<()> {
        self.with_pending(|pending| {
            let table = self.db.table.lock();
            table.guard_open()?;
            for (i, obj) in objs.iter().enumerate() {
                let mut staged = pending.creates.clone();
                staged.extend(objs[..i].iter().cloned());
                table.check_constraints(obj, &staged)?;
            }
            drop(table);
            pending.creates.extend(objs.iter().cloned());
            Ok(())
        })
    }

    async fn count(&self, query: &Query, _opts: &DbOptions) -> StoreResult<i64> {
        self.with_pending(|pending| {
            let rows = self.snapshot(pending)?;
            let mut n = 0i64;
            for obj in &rows {
                if matches(query, obj)? {
                    n += 1;
                }
            }
            Ok(n)
        })
    }

    async fn get_last(&self, query: &Query, _opts: &DbOptions) -> StoreResult<Object> {
        let narrowed = query.clone().newest_first().limit(1);
        self.with_pending(|pending| {
            let rows = self.snapshot(pending)?;
            evaluate(&narrowed, &rows)?.into_iter().next().ok_or(StoreError::NotFound)
        })
    }

    async fn get_all(&self, query: &Query, _opts: &DbOptions) -> StoreResult<Vec<Object>> {
        self.with_pending(|pending| {
            let rows = self.snapshot(pending)?;
            evaluate(query, &rows)
        })
    }

    async fn update_peer_hash(
        &self,
        obj: &Object,
        new_peer_hash: &str,
        _opts: &DbOptions,
    ) -> StoreResult<()> {
        self.with_pending(|pending| {
            let rows = self.snapshot(pending)?;
            if !rows.iter().any(|row| row.id == obj.id) {
                return Err(StoreError::NotFound);
            }
            pending.peer_updates.push((obj.id.clone(), new_peer_hash.to_string()));
            Ok(())
        })
    }

    async fn begin(&self) -> StoreResult<DbHandle> {
        Err(StoreError::transaction("nested transactions are not supported"))
    }

    async fn commit(&self) -> StoreResult<()> {
        let Some(pending) = self.pending.lock().take() else {
            // Already finished; composing an explicit commit with the
            // automatic finishing pass must not fail.
            return Ok(());
        };
        let mut table = self.db.table.lock();
        table.guard_open()?;
        for (i, obj) in pending.creates.iter().enumerate() {
            table.check_constraints(obj, &pending.creates[..i])?;
        }
        for (id, peer_hash) in &pending.peer_updates {
            if let Some(row) = table.rows.iter_mut().find(|row| &row.id == id) {
                row.peer_hash = peer_hash.clone();
            }
        }
        table.rows.extend(pending.creates);
        Ok(())
    }

    async fn rollback(&self) -> StoreResult<()> {
        self.pending.lock().take();
        Ok(())
    }

    async fn create_tables(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        // Closing belongs to the pool-backed handle.
        Ok(())
    }
}
