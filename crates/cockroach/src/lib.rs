//! CockroachDB/PostgreSQL store adapter for the patchain ledger.
//!
//! [`CockroachDb`] implements the `patchain-storage` [`Db`] trait over a
//! `sqlx` connection pool. The backend must offer SERIALIZABLE (or
//! equivalent) isolation, unique B-tree indexes, and honest SQLSTATE
//! restart signalling — CockroachDB and PostgreSQL both qualify.
//!
//! On startup, [`create_tables`](patchain_storage::Db::create_tables)
//! probes `INFORMATION_SCHEMA.tables` and creates the `objects` table and
//! its indexes only when absent.
//!
//! # Example
//!
//! ```no_run
//! use patchain_cockroach::{CockroachConfig, CockroachDb};
//! use patchain_storage::Db;
//!
//! # async fn example() -> patchain_storage::StoreResult<()> {
//! let config = CockroachConfig::builder()
//!     .connection_string("postgres://root@localhost:26257/patchain?sslmode=disable")
//!     .build();
//! let db = CockroachDb::connect(config).await?;
//! db.create_tables().await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

mod config;
mod db;
mod error;
mod sql;

pub use config::{
    CockroachConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_IDLE_CONNS, DEFAULT_MAX_OPEN_CONNS,
};
pub use db::CockroachDb;
