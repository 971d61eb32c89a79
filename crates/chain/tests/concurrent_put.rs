//! Contention tests: concurrent appenders against one partition, and
//! deterministic retry behavior with injected faults.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{sync::Arc, time::Duration};

use patchain_chain::{BackoffConfig, ChainClient};
use patchain_storage::{
    testutil::{make_batch, make_record, FlakyDb},
    Db, DbOptions, MemoryDb, Object, Query,
};
use tokio::task::JoinSet;

/// Backoff tuned for tests: same discipline, millisecond scale.
fn fast_backoff() -> BackoffConfig {
    BackoffConfig::builder()
        .initial_interval(Duration::from_millis(2))
        .max_interval(Duration::from_millis(20))
        .max_elapsed_time(Duration::from_secs(30))
        .build()
}

/// `k` concurrent writers, `m` records each, one partition: every call must
/// commit and the final chain must be fully linked.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_puts_all_commit_with_a_valid_chain() {
    const WRITERS: usize = 8;
    const RECORDS_PER_WRITER: usize = 2;

    let db = MemoryDb::new();
    let client = Arc::new(
        ChainClient::builder()
            .db(Arc::new(db.clone()))
            .backoff(fast_backoff())
            .build(),
    );
    let markers = client.create_partitions(1, "O", "C", &DbOptions::none()).await.unwrap();

    let mut set = JoinSet::new();
    for writer in 0..WRITERS {
        let client = Arc::clone(&client);
        set.spawn(async move {
            let batch = make_batch("O", &format!("w{writer}"), RECORDS_PER_WRITER);
            client.put(batch, &DbOptions::none()).await
        });
    }
    while let Some(result) = set.join_next().await {
        result.expect("task must not panic").expect("every put must commit");
    }

    let mut records: Vec<Object> = db
        .dump()
        .into_iter()
        .filter(|obj| obj.partition_id == markers[0].id)
        .collect();
    records.sort_by_key(|obj| obj.timestamp);

    assert_eq!(records.len(), 2 + WRITERS * RECORDS_PER_WRITER);
    for i in 1..records.len() {
        assert_eq!(records[i].prev_hash, records[i - 1].hash, "link broken at {i}");
    }
    assert!(records.last().unwrap().peer_hash.is_empty());
}

/// An injected restart makes the retry observable and deterministic: the
/// put succeeds and the controller records exactly one retry.
#[tokio::test]
async fn injected_restart_is_retried_exactly_once() {
    let inner = MemoryDb::new();

    // Partitions over the plain backend, then arm one failure for the put.
    let setup = ChainClient::builder()
        .db(Arc::new(inner.clone()))
        .backoff(fast_backoff())
        .build();
    setup.create_partitions(1, "O", "C", &DbOptions::none()).await.unwrap();

    let flaky = Arc::new(FlakyDb::new(Arc::new(inner.clone()), 1));
    let client = ChainClient::builder()
        .db(flaky)
        .backoff(fast_backoff())
        .build();

    client.put_one(make_record("O", "k1"), &DbOptions::none()).await.unwrap();

    assert_eq!(client.retry_stats().retries(), 1, "exactly one retry");
    assert_eq!(
        inner.count(&Query::new().key("k1"), &DbOptions::none()).await.unwrap(),
        1,
        "the record committed exactly once"
    );
    // Genesis pair + the appended record.
    let partition_records = inner
        .dump()
        .into_iter()
        .filter(|obj| !obj.partition_id.is_empty())
        .count();
    assert_eq!(partition_records, 3);
}

/// A permanent failure must stop the loop on the first attempt.
#[tokio::test]
async fn permanent_failures_are_not_retried() {
    let client = ChainClient::builder()
        .db(MemoryDb::handle())
        .backoff(fast_backoff())
        .build();

    let err = client.put(vec![make_record("O", "k")], &DbOptions::none()).await.unwrap_err();
    assert!(!err.is_retryable());
    assert_eq!(client.retry_stats().retries(), 0);
}

/// Two sequential clients over the same table: the second observes the
/// first's tail, never a stale anchor.
#[tokio::test]
async fn appends_from_separate_clients_share_one_chain() {
    let db = MemoryDb::new();
    let make_client = || {
        ChainClient::builder()
            .db(Arc::new(db.clone()))
            .backoff(fast_backoff())
            .build()
    };

    let first = make_client();
    first.create_partitions(1, "O", "C", &DbOptions::none()).await.unwrap();
    let a = first.put_one(make_record("O", "a"), &DbOptions::none()).await.unwrap();

    let second = make_client();
    let b = second.put_one(make_record("O", "b"), &DbOptions::none()).await.unwrap();

    assert_eq!(b.prev_hash, a.hash);
    assert!(b.timestamp > a.timestamp);
}
