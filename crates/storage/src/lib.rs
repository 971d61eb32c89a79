//! Record model and store-adapter abstraction for the patchain ledger.
//!
//! A patchain is a tamper-evident, hash-chained object ledger layered on a
//! relational database. This crate provides the pieces every backend and
//! the chain engine share:
//!
//! - [`Object`] — the canonical record with its hash algebra
//!   ([`Object::init`], [`Object::compute_hash`],
//!   [`Object::compute_peer_hash`]) and the [`make_chain`] linking
//!   primitive;
//! - [`Db`] — the store-adapter trait (create, reads, the single peer-hash
//!   mutation, transaction lifecycle) with the [`DbOptions`] record for
//!   threading a transaction through operations;
//! - [`Query`] — a typed filter builder translated by adapters into
//!   filter/order/limit clauses;
//! - [`StoreError`] — the error taxonomy the retry controller classifies,
//!   including the substring fallback for opaque driver messages;
//! - [`MemoryDb`] — the reference backend for tests and development,
//!   enforcing the production schema's unique indexes.
//!
//! The production CockroachDB/PostgreSQL adapter lives in
//! `patchain-cockroach`; the chain engine (partition allocation, `put`,
//! retries) lives in `patchain-chain`.
//!
//! # Example
//!
//! ```
//! use patchain_storage::{Db, DbOptions, MemoryDb, Object, Query};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let db = MemoryDb::new();
//!
//! let mut obj = Object { owner_id: "owner-1".into(), key: "doc/a".into(), ..Object::default() };
//! obj.init().compute_hash();
//! db.create(&obj, &DbOptions::none()).await.unwrap();
//!
//! let found = db.get_last(&Query::new().key("doc/a"), &DbOptions::none()).await.unwrap();
//! assert_eq!(found.id, obj.id);
//! # });
//! ```

#![deny(unsafe_code)]

pub mod backend;
pub mod error;
pub mod memory;
pub mod object;
pub mod query;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub mod testutil;
pub mod transaction;

pub use backend::{Db, DbHandle, DbOptions, UseDb};
pub use error::{BoxError, StoreError, StoreResult, HASH_INDEX, PREV_HASH_INDEX};
pub use memory::MemoryDb;
pub use object::{make_chain, now_nanos, sha256_hex, Object, MAX_VALUE_LEN, SCHEMA_VERSION};
pub use query::{queryable_fields, Field, Query, RawExpr, Value, DEFAULT_FIELD_BLACKLIST};
pub use transaction::{transact, transact_with_db};
