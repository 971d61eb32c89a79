//! Chained-append engine for the patchain ledger.
//!
//! This crate drives writes against a `patchain-storage` backend:
//!
//! - [`ChainClient::create_partitions`] — appends partition markers to the
//!   global partition chain, each with its genesis pair, in one
//!   transaction;
//! - [`ChainClient::put`] — appends records to one partition of their
//!   owner, chaining them onto the tail and binding the former tail's peer
//!   hash forward;
//! - [`ChainClient::create`] / [`ChainClient::create_once`] — unchained
//!   convenience writes;
//! - [`retry`] — the exponential-backoff harness that replays transactional
//!   closures on SERIALIZABLE restarts and chain-link unique violations.
//!
//! # Example
//!
//! ```
//! use patchain_chain::ChainClient;
//! use patchain_storage::{DbOptions, MemoryDb, Object};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let client = ChainClient::builder().db(MemoryDb::handle()).build();
//!
//! let markers = client
//!     .create_partitions(1, "owner-1", "creator-1", &DbOptions::none())
//!     .await
//!     .unwrap();
//! assert_eq!(markers.len(), 1);
//!
//! let record = Object { owner_id: "owner-1".into(), key: "doc/a".into(), ..Object::default() };
//! let chained = client.put_one(record, &DbOptions::none()).await.unwrap();
//! assert_eq!(chained.partition_id, markers[0].id);
//! # });
//! ```

#![deny(unsafe_code)]

pub mod client;
pub mod error;
pub mod keys;
pub mod retry;

pub use client::ChainClient;
pub use error::{ChainError, ChainResult};
pub use retry::{
    with_backoff, BackoffConfig, RetryStats, Stopper, DEFAULT_INITIAL_INTERVAL,
    DEFAULT_MAX_ELAPSED_TIME, DEFAULT_MAX_INTERVAL, DEFAULT_MULTIPLIER,
    DEFAULT_RANDOMIZATION_FACTOR,
};
