//! End-to-end scenarios for partition allocation and chained appends,
//! driven against the in-memory backend.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use patchain_chain::{
    keys::{GENESIS_KEY_1, GENESIS_KEY_2},
    ChainClient,
};
use patchain_storage::{sha256_hex, Db, DbOptions, MemoryDb, Object, Query};

fn client() -> (ChainClient, MemoryDb) {
    let db = MemoryDb::new();
    let client = ChainClient::builder().db(std::sync::Arc::new(db.clone())).build();
    (client, db)
}

fn record(owner: &str, key: &str) -> Object {
    Object {
        owner_id: owner.to_string(),
        creator_id: owner.to_string(),
        key: key.to_string(),
        ..Object::default()
    }
}

/// Collects a partition's records in timestamp order and checks every chain
/// invariant: genesis pair at the head anchored to the marker, every link,
/// every peer binding, empty peer hash on the tail, and hash recomputation
/// stability.
fn assert_partition_chain(db: &MemoryDb, marker: &Object, expected_user_records: usize) {
    let mut records: Vec<Object> = db
        .dump()
        .into_iter()
        .filter(|obj| obj.partition_id == marker.id)
        .collect();
    records.sort_by_key(|obj| obj.timestamp);

    assert_eq!(records.len(), 2 + expected_user_records, "genesis pair plus user records");
    assert_eq!(records[0].key, GENESIS_KEY_1);
    assert_eq!(records[1].key, GENESIS_KEY_2);
    assert_eq!(records[0].prev_hash, marker.hash, "genesis anchors to the marker");

    for i in 1..records.len() {
        assert_eq!(
            records[i].prev_hash,
            records[i - 1].hash,
            "link broken at position {i}"
        );
    }
    for i in 0..records.len() - 1 {
        assert_eq!(
            records[i].peer_hash,
            sha256_hex(&format!("{}/{}", records[i].hash, records[i + 1].hash)),
            "peer binding broken at position {i}"
        );
    }
    assert!(records.last().unwrap().peer_hash.is_empty(), "tail peer hash must be empty");

    for obj in &records {
        let mut copy = obj.clone();
        copy.compute_hash();
        assert_eq!(copy.hash, obj.hash, "hash must be recomputable from content");
    }
}

#[tokio::test]
async fn first_partition_batch_chains_from_its_own_id() {
    let (client, db) = client();
    let markers = client.create_partitions(3, "O", "C", &DbOptions::none()).await.unwrap();

    assert_eq!(markers.len(), 3);
    assert_eq!(markers[0].prev_hash, sha256_hex(&markers[0].id));
    assert_eq!(markers[1].prev_hash, markers[0].hash);
    assert_eq!(markers[2].prev_hash, markers[1].hash);

    for marker in &markers {
        let companions = db
            .get_all(&Query::new().partition(marker.id.clone()), &DbOptions::none())
            .await
            .unwrap();
        assert_eq!(companions.len(), 2, "each marker owns a genesis pair");
        assert_partition_chain(&db, marker, 0);
    }
}

#[tokio::test]
async fn second_partition_batch_chains_onto_the_first() {
    let (client, _db) = client();
    let first = client.create_partitions(3, "O", "C", &DbOptions::none()).await.unwrap();
    let second = client.create_partitions(2, "O", "C", &DbOptions::none()).await.unwrap();

    assert_eq!(second[0].prev_hash, first[2].hash);
    assert_eq!(second[1].prev_hash, second[0].hash);
}

#[tokio::test]
async fn put_into_a_fresh_partition_anchors_to_genesis() {
    let (client, db) = client();
    let markers = client.create_partitions(1, "O", "C", &DbOptions::none()).await.unwrap();
    let marker = &markers[0];

    let genesis_tail = client
        .get_last(Query::new().partition(marker.id.clone()), &DbOptions::none())
        .await
        .unwrap();
    assert_eq!(genesis_tail.key, GENESIS_KEY_2);

    let records = client
        .put(
            vec![record("O", "k1"), record("O", "k2"), record("O", "k3")],
            &DbOptions::none(),
        )
        .await
        .unwrap();

    assert_eq!(records.len(), 3);
    for obj in &records {
        assert_eq!(obj.partition_id, marker.id);
    }
    assert_eq!(records[0].prev_hash, genesis_tail.hash);
    assert_eq!(records[1].prev_hash, records[0].hash);
    assert_eq!(records[2].prev_hash, records[1].hash);

    // The formerly-tail genesis record is now bound forward.
    let updated_tail = client
        .get_last(Query::new().key(GENESIS_KEY_2), &DbOptions::none())
        .await
        .unwrap();
    assert_eq!(
        updated_tail.peer_hash,
        sha256_hex(&format!("{}/{}", genesis_tail.hash, records[0].hash))
    );

    assert_partition_chain(&db, marker, 3);
}

#[tokio::test]
async fn second_put_extends_the_chain() {
    let (client, db) = client();
    let markers = client.create_partitions(1, "O", "C", &DbOptions::none()).await.unwrap();

    let first = client
        .put(
            vec![record("O", "k1"), record("O", "k2"), record("O", "k3")],
            &DbOptions::none(),
        )
        .await
        .unwrap();
    let fourth = client.put_one(record("O", "k4"), &DbOptions::none()).await.unwrap();

    assert_eq!(fourth.prev_hash, first[2].hash);

    // The prior tail's peer hash now binds to the new record.
    let prior_tail = client
        .get_last(Query::new().key("k3"), &DbOptions::none())
        .await
        .unwrap();
    assert_eq!(
        prior_tail.peer_hash,
        sha256_hex(&format!("{}/{}", prior_tail.hash, fourth.hash))
    );

    assert_partition_chain(&db, &markers[0], 4);
}

#[tokio::test]
async fn chain_link_index_is_never_violated_post_commit() {
    let (client, db) = client();
    client.create_partitions(2, "O", "C", &DbOptions::none()).await.unwrap();
    for i in 0..6 {
        client.put_one(record("O", &format!("k{i}")), &DbOptions::none()).await.unwrap();
    }

    let rows = db.dump();
    for (i, a) in rows.iter().enumerate() {
        for b in rows.iter().skip(i + 1) {
            assert!(
                !(a.partition_id == b.partition_id && a.prev_hash == b.prev_hash),
                "duplicate chain link: {} and {}",
                a.key,
                b.key
            );
            assert_ne!(a.hash, b.hash, "duplicate content hash");
        }
    }
}

#[tokio::test]
async fn put_distributes_across_every_partition() {
    let (client, _db) = client();
    let markers = client.create_partitions(3, "O", "C", &DbOptions::none()).await.unwrap();

    let mut seen = std::collections::HashSet::new();
    for i in 0..60 {
        let obj = client.put_one(record("O", &format!("k{i}")), &DbOptions::none()).await.unwrap();
        seen.insert(obj.partition_id);
    }

    // A uniform pick over the full set reaches every partition, in
    // particular the last one.
    for marker in &markers {
        assert!(seen.contains(&marker.id), "partition {} never selected", marker.key);
    }
}

#[tokio::test]
async fn get_last_miss_returns_the_sentinel() {
    let (client, _db) = client();
    let result = client.get_last(Query::new().key("missing"), &DbOptions::none()).await;
    patchain_storage::assert_not_found!(result);
}

#[tokio::test]
async fn create_once_is_idempotent_per_key() {
    let (client, db) = client();

    let mut first = record("O", "singleton");
    client.create_once(&mut first, &DbOptions::none()).await.unwrap();

    let mut second = record("O", "singleton");
    client.create_once(&mut second, &DbOptions::none()).await.unwrap();

    assert_eq!(
        db.count(&Query::new().key("singleton"), &DbOptions::none()).await.unwrap(),
        1
    );
    assert_eq!(second.id, first.id, "second call observes the stored id");
    assert_eq!(second.timestamp, first.timestamp);
    assert_eq!(second.hash, first.hash);
}

#[tokio::test]
async fn create_allows_duplicate_keys() {
    let (client, db) = client();

    let mut a = record("O", "dup");
    let mut b = record("O", "dup");
    client.create(&mut a, &DbOptions::none()).await.unwrap();
    client.create(&mut b, &DbOptions::none()).await.unwrap();

    assert_eq!(db.count(&Query::new().key("dup"), &DbOptions::none()).await.unwrap(), 2);
}

#[tokio::test]
async fn put_runs_on_a_caller_supplied_transaction() {
    let (client, db) = client();
    client.create_partitions(1, "O", "C", &DbOptions::none()).await.unwrap();

    let tx = db.begin().await.unwrap();
    let opts = DbOptions::with_tx(std::sync::Arc::clone(&tx));
    client.put(vec![record("O", "k1")], &opts).await.unwrap();

    // Nothing visible until the caller commits its transaction.
    assert_eq!(db.count(&Query::new().key("k1"), &DbOptions::none()).await.unwrap(), 0);
    tx.commit().await.unwrap();
    assert_eq!(db.count(&Query::new().key("k1"), &DbOptions::none()).await.unwrap(), 1);
}
