//! Key namespaces and record constructors.
//!
//! Every record's `key` is a short namespaced string. The domain prefixes
//! and the genesis keys below are deployment-wide constants: mixing
//! prefixed and un-prefixed generations in one database breaks prefix
//! queries, so they must be consistent across a deployment.

use patchain_storage::{make_chain, Object, SCHEMA_VERSION};

use crate::error::{ChainError, ChainResult};

/// Prefix of partition marker keys.
pub const PARTITION_PREFIX: &str = "partition/";

/// Prefix of identity record keys.
pub const IDENTITY_PREFIX: &str = "identity/";

/// Prefix of mapping record keys.
pub const MAPPING_PREFIX: &str = "mapping/";

/// Key of the first genesis record of a partition.
pub const GENESIS_KEY_1: &str = "$genesis/1";

/// Key of the second genesis record — the initial chain tail of a
/// writable partition.
pub const GENESIS_KEY_2: &str = "$genesis/2";

/// Builds a partition key from a partition name.
#[must_use]
pub fn make_partition_key(name: &str) -> String {
    format!("{PARTITION_PREFIX}{name}")
}

/// Builds an identity key from an email address.
#[must_use]
pub fn make_identity_key(email: &str) -> String {
    format!("{IDENTITY_PREFIX}{email}")
}

/// Builds a mapping key from a mapping name.
#[must_use]
pub fn make_mapping_key(name: &str) -> String {
    format!("{MAPPING_PREFIX}{name}")
}

/// Splits a namespaced key into `(prefix, name)` at the first `/`.
///
/// The returned prefix excludes the separator. Fails with
/// [`ChainError::InvalidKey`] when the key has no namespace.
pub fn split_key(key: &str) -> ChainResult<(&str, &str)> {
    match key.split_once('/') {
        Some((prefix, name)) if !prefix.is_empty() => Ok((prefix, name)),
        _ => Err(ChainError::InvalidKey),
    }
}

/// Builds an initialized partition marker.
///
/// The marker's `prev_hash` defaults to `SHA256(id)`; partition chaining
/// overwrites it with the previous marker's hash.
#[must_use]
pub fn make_partition_object(name: &str, owner_id: &str, creator_id: &str) -> Object {
    let mut obj = Object {
        owner_id: owner_id.to_string(),
        creator_id: creator_id.to_string(),
        key: make_partition_key(name),
        ..Object::default()
    };
    obj.init();
    obj
}

/// Builds an initialized identity record.
#[must_use]
pub fn make_identity_object(
    owner_id: &str,
    creator_id: &str,
    email: &str,
    protected: bool,
) -> Object {
    let mut obj = Object {
        owner_id: owner_id.to_string(),
        creator_id: creator_id.to_string(),
        key: make_identity_key(email),
        protected,
        ..Object::default()
    };
    obj.init();
    obj
}

/// Builds an initialized mapping record. The owner is also the creator.
#[must_use]
pub fn make_mapping_object(owner_id: &str, name: &str, mapping: &str) -> Object {
    let mut obj = Object {
        owner_id: owner_id.to_string(),
        creator_id: owner_id.to_string(),
        key: make_mapping_key(name),
        value: mapping.to_string(),
        ..Object::default()
    };
    obj.init();
    obj
}

/// Builds the chained genesis pair of a partition.
///
/// `$genesis/1` anchors to the partition marker's hash and `$genesis/2`
/// chains to `$genesis/1`; both carry the marker's id as `partition_id`.
/// Their presence is the signal that the partition is writable.
#[must_use]
pub fn make_genesis_pair(
    owner_id: &str,
    creator_id: &str,
    partition_id: &str,
    partition_hash: &str,
) -> Vec<Object> {
    let mut pair = vec![
        Object {
            owner_id: owner_id.to_string(),
            creator_id: creator_id.to_string(),
            partition_id: partition_id.to_string(),
            key: GENESIS_KEY_1.to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            prev_hash: partition_hash.to_string(),
            ..Object::default()
        },
        Object {
            owner_id: owner_id.to_string(),
            creator_id: creator_id.to_string(),
            partition_id: partition_id.to_string(),
            key: GENESIS_KEY_2.to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            ..Object::default()
        },
    ];
    make_chain(&mut pair);
    pair
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use patchain_storage::sha256_hex;

    use super::*;

    #[test]
    fn key_constructors_apply_prefixes() {
        assert_eq!(make_partition_key("partition_a"), "partition/partition_a");
        assert_eq!(make_identity_key("lana@example.com"), "identity/lana@example.com");
        assert_eq!(make_mapping_key("mapping_a"), "mapping/mapping_a");
    }

    #[test]
    fn split_key_rejects_unnamespaced_keys() {
        let err = split_key("some_invalid_key_format").unwrap_err();
        assert_eq!(err.to_string(), "invalid key format");
    }

    #[test]
    fn split_key_returns_prefix_and_name() {
        let key = make_mapping_key("mapping_a");
        let (prefix, name) = split_key(&key).unwrap();
        assert_eq!(format!("{prefix}/"), MAPPING_PREFIX);
        assert_eq!(name, "mapping_a");
    }

    #[test]
    fn partition_object_is_initialized() {
        let obj = make_partition_object("partition_a", "owner_id", "creator_id");
        assert_eq!(obj.owner_id, "owner_id");
        assert_eq!(obj.creator_id, "creator_id");
        assert_eq!(obj.key, make_partition_key("partition_a"));
        assert!(!obj.id.is_empty());
        assert_eq!(obj.prev_hash, sha256_hex(&obj.id));
        assert!(obj.timestamp > 0);
    }

    #[test]
    fn identity_object_carries_protection() {
        let obj = make_identity_object("owner_id", "creator_id", "lana@example.com", true);
        assert_eq!(obj.key, make_identity_key("lana@example.com"));
        assert!(obj.protected);
        assert!(!obj.id.is_empty());
    }

    #[test]
    fn mapping_object_creator_is_the_owner() {
        let obj = make_mapping_object("owner_id", "mapping_a", r#"{ "name": "ref1" }"#);
        assert_eq!(obj.creator_id, "owner_id");
        assert_eq!(obj.key, make_mapping_key("mapping_a"));
        assert_eq!(obj.value, r#"{ "name": "ref1" }"#);
    }

    #[test]
    fn genesis_pair_is_anchored_and_chained() {
        let pair = make_genesis_pair("owner_id", "creator_id", "partition_id", "partition_hash");
        assert_eq!(pair[0].key, GENESIS_KEY_1);
        assert_eq!(pair[1].key, GENESIS_KEY_2);
        assert_eq!(pair[0].prev_hash, "partition_hash");
        assert_eq!(pair[1].prev_hash, pair[0].hash);
        assert_eq!(pair[0].partition_id, "partition_id");
        assert_eq!(pair[1].partition_id, "partition_id");

        let mut expected = pair[0].clone();
        expected.compute_peer_hash(&pair[1].hash.clone());
        assert_eq!(pair[0].peer_hash, expected.peer_hash);
        assert!(pair[1].peer_hash.is_empty());
    }
}
