//! The CockroachDB store adapter.
//!
//! [`CockroachDb`] implements [`Db`] over a `sqlx` PostgreSQL pool. All SQL
//! is runtime-checked (`sqlx::query`, not macros) so building the crate
//! does not require a live database. Transaction handles wrap a
//! `sqlx::Transaction` behind an async lock; handles are short-lived and
//! used by one logical caller at a time.

use std::sync::Arc;

use async_trait::async_trait;
use patchain_storage::{
    queryable_fields, Db, DbHandle, DbOptions, Object, Query, StoreError, StoreResult, Value,
};
use sqlx::{
    postgres::{PgArguments, PgPoolOptions, PgRow},
    PgPool, Postgres, Row,
};
use tokio::sync::Mutex;

use crate::{config::CockroachConfig, error::map_sqlx_err, sql};

/// CockroachDB/PostgreSQL-backed [`Db`] implementation.
///
/// The adapter owns the connection pool; it is cheap to clone and every
/// clone shares the pool.
#[derive(Clone)]
pub struct CockroachDb {
    pool: PgPool,
    field_blacklist: Vec<String>,
}

impl CockroachDb {
    /// Connects a new pool per `config`.
    pub async fn connect(config: CockroachConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_open_conns)
            .min_connections(config.max_idle_conns)
            .acquire_timeout(config.connect_timeout)
            .connect(&config.connection_string)
            .await
            .map_err(map_sqlx_err)?;
        tracing::info!(
            max_open = config.max_open_conns,
            max_idle = config.max_idle_conns,
            "connected to cockroach"
        );
        Ok(Self { pool, field_blacklist: config.field_blacklist })
    }

    /// Wraps an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            field_blacklist: patchain_storage::DEFAULT_FIELD_BLACKLIST
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Wraps the adapter into a shared handle.
    #[must_use]
    pub fn handle(self) -> DbHandle {
        Arc::new(self)
    }

    /// Verifies connectivity with a trivial round trip.
    pub async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(map_sqlx_err)?;
        Ok(())
    }

    /// The JSON field names the external structured-query parser may use,
    /// after this deployment's blacklist.
    #[must_use]
    pub fn valid_object_fields(&self) -> Vec<&'static str> {
        let blacklist: Vec<&str> = self.field_blacklist.iter().map(String::as_str).collect();
        queryable_fields(&blacklist)
    }
}

#[async_trait]
impl Db for CockroachDb {
    async fn create(&self, obj: &Object, opts: &DbOptions) -> StoreResult<()> {
        if let Some(tx) = opts.tx() {
            return tx.create(obj, &DbOptions::none()).await;
        }
        exec_insert(&self.pool, obj).await
    }

    async fn create_bulk(&self, objs: &[Object], opts: &DbOptions) -> StoreResult<()> {
        if let Some(tx) = opts.tx() {
            return tx.create_bulk(objs, &DbOptions::none()).await;
        }
        for obj in objs {
            exec_insert(&self.pool, obj).await?;
        }
        Ok(())
    }

    async fn count(&self, query: &Query, opts: &DbOptions) -> StoreResult<i64> {
        if let Some(tx) = opts.tx() {
            return tx.count(query, &DbOptions::none()).await;
        }
        fetch_count(&self.pool, query).await
    }

    async fn get_last(&self, query: &Query, opts: &DbOptions) -> StoreResult<Object> {
        if let Some(tx) = opts.tx() {
            return tx.get_last(query, &DbOptions::none()).await;
        }
        let narrowed = query.clone().newest_first().limit(1);
        fetch_objects(&self.pool, &narrowed)
            .await?
            .into_iter()
            .next()
            .ok_or(StoreError::NotFound)
    }

    async fn get_all(&self, query: &Query, opts: &DbOptions) -> StoreResult<Vec<Object>> {
        if let Some(tx) = opts.tx() {
            return tx.get_all(query, &DbOptions::none()).await;
        }
        fetch_objects(&self.pool, query).await
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
        exec_update_peer_hash(&self.pool, &obj.id, new_peer_hash).await
    }

    async fn begin(&self) -> StoreResult<DbHandle> {
        let tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        Ok(Arc::new(CockroachTx { inner: Mutex::new(Some(tx)) }))
    }

    async fn commit(&self) -> StoreResult<()> {
        Err(StoreError::transaction("connection is not a transaction"))
    }

    async fn rollback(&self) -> StoreResult<()> {
        Err(StoreError::transaction("connection is not a transaction"))
    }

    async fn create_tables(&self) -> StoreResult<()> {
        let present: i64 = sqlx::query_scalar(sql::TABLE_PROBE_SQL)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        if present > 0 {
            tracing::debug!("objects table already present");
            return Ok(());
        }
        for statement in sql::SCHEMA_SQL {
            sqlx::query(statement).execute(&self.pool).await.map_err(map_sqlx_err)?;
        }
        tracing::info!("created objects table and indexes");
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// Transaction-backed handle over a [`CockroachDb`] pool.
struct CockroachTx {
    inner: Mutex<Option<sqlx::Transaction<'static, Postgres>>>,
}

#[async_trait]
impl Db for CockroachTx {
    async fn create(&self, obj: &Object, _opts: &DbOptions) -> StoreResult<()> {
        let mut guard = self.inner.lock().await;
        let tx = guard
            .as_mut()
            .ok_or_else(|| StoreError::transaction("transaction already finished"))?;
        exec_insert(&mut **tx, obj).await
    }

    async fn create_bulk(&self, objs: &[Object], _opts: &DbOptions) -> StoreResult<()> {
        let mut guard = self.inner.lock().await;
        let tx = guard
            .as_mut()
            .ok_or_else(|| StoreError::transaction("transaction already finished"))?;
        for obj in objs {
            exec_insert(&mut **tx, obj).await?;
        }
        Ok(())
    }

    async fn count(&self, query: &Query, _opts: &DbOptions) -> StoreResult<i64> {
        let mut guard = self.inner.lock().await;
        let tx = guard
            .as_mut()
            .ok_or_else(|| StoreError::transaction("transaction already finished"))?;
        fetch_count(&mut **tx, query).await
    }

    async fn get_last(&self, query: &Query, _opts: &DbOptions) -> StoreResult<Object> {
        let mut guard = self.inner.lock().await;
        let tx = guard
            .as_mut()
            .ok_or_else(|| StoreError::transaction("transaction already finished"))?;
        let narrowed = query.clone().newest_first().limit(1);
        fetch_objects(&mut **tx, &narrowed)
            .await?
            .into_iter()
            .next()
            .ok_or(StoreError::NotFound)
    }

    async fn get_all(&self, query: &Query, _opts: &DbOptions) -> StoreResult<Vec<Object>> {
        let mut guard = self.inner.lock().await;
        let tx = guard
            .as_mut()
            .ok_or_else(|| StoreError::transaction("transaction already finished"))?;
        fetch_objects(&mut **tx, query).await
    }

    async fn update_peer_hash(
        &self,
        obj: &Object,
        new_peer_hash: &str,
        _opts: &DbOptions,
    ) -> StoreResult<()> {
        let mut guard = self.inner.lock().await;
        let tx = guard
            .as_mut()
            .ok_or_else(|| StoreError::transaction("transaction already finished"))?;
        exec_update_peer_hash(&mut **tx, &obj.id, new_peer_hash).await
    }

    async fn begin(&self) -> StoreResult<DbHandle> {
        Err(StoreError::transaction("nested transactions are not supported"))
    }

    async fn commit(&self) -> StoreResult<()> {
        match self.inner.lock().await.take() {
            Some(tx) => tx.commit().await.map_err(map_sqlx_err),
            // Already finished; the automatic finishing pass composes with
            // an explicit commit or rollback from the closure.
            None => Ok(()),
        }
    }

    async fn rollback(&self) -> StoreResult<()> {
        match self.inner.lock().await.take() {
            Some(tx) => tx.rollback().await.map_err(map_sqlx_err),
            None => Ok(()),
        }
    }

    async fn create_tables(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        // Closing belongs to the pool-backed handle.
        Ok(())
    }
}

/// Appends one typed bind to a query.
fn bind_value<'q>(
    q: sqlx::query::Query<'q, Postgres, PgArguments>,
    value: &Value,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match value {
        Value::Text(s) => q.bind(s.clone()),
        Value::Bool(b) => q.bind(*b),
        Value::Int(i) => q.bind(*i),
    }
}

/// Appends one typed bind to a scalar query.
fn bind_scalar<'q>(
    q: sqlx::query::QueryScalar<'q, Postgres, i64, PgArguments>,
    value: &Value,
) -> sqlx::query::QueryScalar<'q, Postgres, i64, PgArguments> {
    match value {
        Value::Text(s) => q.bind(s.clone()),
        Value::Bool(b) => q.bind(*b),
        Value::Int(i) => q.bind(*i),
    }
}

async fn exec_insert<'e, E>(executor: E, obj: &Object) -> StoreResult<()>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query(sql::INSERT_SQL)
        .bind(obj.id.clone())
        .bind(obj.owner_id.clone())
        .bind(obj.creator_id.clone())
        .bind(obj.partition_id.clone())
        .bind(obj.key.clone())
        .bind(obj.value.clone())
        .bind(obj.protected)
        .bind(obj.ref_only)
        .bind(obj.timestamp)
        .bind(obj.prev_hash.clone())
        .bind(obj.hash.clone())
        .bind(obj.peer_hash.clone())
        .bind(obj.schema_version.clone())
        .bind(obj.ref1.clone())
        .bind(obj.ref2.clone())
        .bind(obj.ref3.clone())
        .bind(obj.ref4.clone())
        .bind(obj.ref5.clone())
        .bind(obj.ref6.clone())
        .bind(obj.ref7.clone())
        .bind(obj.ref8.clone())
        .bind(obj.ref9.clone())
        .bind(obj.ref10.clone())
        .execute(executor)
        .await
        .map_err(map_sqlx_err)?;
    Ok(())
}

async fn exec_update_peer_hash<'e, E>(executor: E, id: &str, peer_hash: &str) -> StoreResult<()>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(sql::UPDATE_PEER_HASH_SQL)
        .bind(peer_hash.to_string())
        .bind(id.to_string())
        .execute(executor)
        .await
        .map_err(map_sqlx_err)?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

async fn fetch_objects<'e, E>(executor: E, query: &Query) -> StoreResult<Vec<Object>>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let (sql_text, binds) = sql::build_select(query);
    let mut q = sqlx::query(&sql_text);
    for value in &binds {
        q = bind_value(q, value);
    }
    let rows = q.fetch_all(executor).await.map_err(map_sqlx_err)?;
    rows.iter().map(object_from_row).collect()
}

async fn fetch_count<'e, E>(executor: E, query: &Query) -> StoreResult<i64>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let (sql_text, binds) = sql::build_count(query);
    let mut q = sqlx::query_scalar::<_, i64>(&sql_text);
    for value in &binds {
        q = bind_scalar(q, value);
    }
    q.fetch_one(executor).await.map_err(map_sqlx_err)
}

fn object_from_row(row: &PgRow) -> StoreResult<Object> {
    Ok(Object {
        id: row.try_get("id").map_err(map_sqlx_err)?,
        owner_id: row.try_get("owner_id").map_err(map_sqlx_err)?,
        creator_id: row.try_get("creator_id").map_err(map_sqlx_err)?,
        partition_id: row.try_get("partition_id").map_err(map_sqlx_err)?,
        key: row.try_get("key").map_err(map_sqlx_err)?,
        value: row.try_get("value").map_err(map_sqlx_err)?,
        protected: row.try_get("protected").map_err(map_sqlx_err)?,
        ref_only: row.try_get("ref_only").map_err(map_sqlx_err)?,
        timestamp: row.try_get("timestamp").map_err(map_sqlx_err)?,
        prev_hash: row.try_get("prev_hash").map_err(map_sqlx_err)?,
        hash: row.try_get("hash").map_err(map_sqlx_err)?,
        peer_hash: row.try_get("peer_hash").map_err(map_sqlx_err)?,
        schema_version: row.try_get("schema_version").map_err(map_sqlx_err)?,
        ref1: row.try_get("ref1").map_err(map_sqlx_err)?,
        ref2: row.try_get("ref2").map_err(map_sqlx_err)?,
        ref3: row.try_get("ref3").map_err(map_sqlx_err)?,
        ref4: row.try_get("ref4").map_err(map_sqlx_err)?,
        ref5: row.try_get("ref5").map_err(map_sqlx_err)?,
        ref6: row.try_get("ref6").map_err(map_sqlx_err)?,
        ref7: row.try_get("ref7").map_err(map_sqlx_err)?,
        ref8: row.try_get("ref8").map_err(map_sqlx_err)?,
        ref9: row.try_get("ref9").map_err(map_sqlx_err)?,
        ref10: row.try_get("ref10").map_err(map_sqlx_err)?,
    })
}
