//! The canonical ledger record and its hash algebra.
//!
//! Everything the ledger stores — user data, identities, partition markers,
//! genesis markers — is a single [`Object`] discriminated by its `key`
//! namespace. The record carries two derived fields:
//!
//! - `hash` — SHA-256 of a canonical rendering of the content fields
//!   ([`Object::compute_hash`]).
//! - `peer_hash` — a forward binding `SHA256(hash ∥ "/" ∥ next.hash)` set
//!   when a successor is appended ([`Object::compute_peer_hash`]).
//!
//! Records inside a partition form a chain: each record's `prev_hash` equals
//! its predecessor's `hash`. [`make_chain`] is the linking primitive that
//! derives both directions over a slice of records.
//!
//! # Immutability
//!
//! Once committed, a record never changes except for a single targeted
//! update of `peer_hash` on the (formerly) tail record when a new tail is
//! appended. There is no delete.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// The schema version this crate produces and understands.
pub const SCHEMA_VERSION: &str = "1";

/// Maximum byte length of an object's `value` payload.
pub const MAX_VALUE_LEN: usize = 64_000;

/// Returns the lowercase hex SHA-256 digest of a UTF-8 string.
#[must_use]
pub fn sha256_hex(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

/// Current wall-clock time in nanoseconds since the Unix epoch.
#[must_use]
pub fn now_nanos() -> i64 {
    // timestamp_nanos_opt only fails past the year 2262.
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// A single ledger record.
///
/// Partition markers carry a `key` under the `partition/` namespace and an
/// empty `partition_id`; genesis markers use the fixed keys `$genesis/1` and
/// `$genesis/2`; everything else is caller data. The `ref1`..`ref10` fields
/// are short auxiliary strings for application-side indexing and participate
/// in the content hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Object {
    /// Opaque unique identifier (UUIDv4), primary key.
    pub id: String,
    /// Actor that owns the record.
    pub owner_id: String,
    /// Actor that created the record.
    pub creator_id: String,
    /// Partition this record belongs to. Empty for partition markers and
    /// bare identity records.
    pub partition_id: String,
    /// Short namespaced key (`partition/…`, `identity/…`, `mapping/…`,
    /// `$genesis/1`, `$genesis/2`, or caller-defined).
    pub key: String,
    /// Opaque payload, at most [`MAX_VALUE_LEN`] bytes.
    pub value: String,
    /// Caller-defined protection flag.
    pub protected: bool,
    /// Caller-defined reference-only flag.
    pub ref_only: bool,
    /// Insert time in nanoseconds since epoch, monotone per writer within a
    /// partition.
    pub timestamp: i64,
    /// Content hash of the preceding record in this partition's chain, or of
    /// the anchoring marker, or `SHA256(id)` for chain heads.
    pub prev_hash: String,
    /// Content hash of this record.
    pub hash: String,
    /// Forward binding to the next record's hash; empty on the chain tail.
    pub peer_hash: String,
    /// Version of the hashing scheme, [`SCHEMA_VERSION`].
    pub schema_version: String,
    pub ref1: String,
    pub ref2: String,
    pub ref3: String,
    pub ref4: String,
    pub ref5: String,
    pub ref6: String,
    pub ref7: String,
    pub ref8: String,
    pub ref9: String,
    pub ref10: String,
}

impl Object {
    /// Fills defaults for unset identity fields. Idempotent: a second call
    /// leaves every field untouched.
    ///
    /// - empty `id` → fresh UUIDv4
    /// - empty `prev_hash` → `SHA256(id)` (chaining overwrites this; the
    ///   default keeps the unique chain-link index satisfiable for
    ///   unchained records)
    /// - zero `timestamp` → current nanoseconds
    /// - empty `schema_version` → [`SCHEMA_VERSION`]
    pub fn init(&mut self) -> &mut Self {
        if self.id.is_empty() {
            self.id = Uuid::new_v4().to_string();
        }
        if self.prev_hash.is_empty() {
            self.prev_hash = sha256_hex(&self.id);
        }
        if self.timestamp == 0 {
            self.timestamp = now_nanos();
        }
        if self.schema_version.is_empty() {
            self.schema_version = SCHEMA_VERSION.to_string();
        }
        self
    }

    /// Recomputes `hash` from the content fields.
    ///
    /// The canonical form is the `/`-joined rendering of every content field
    /// in schema order, with `key` and `value` pre-hashed so payload bytes
    /// never appear in the canonical string, booleans as `true`/`false` and
    /// the timestamp in decimal. Only defined for schema version `"1"`;
    /// other versions are left untouched.
    pub fn compute_hash(&mut self) -> &mut Self {
        if self.schema_version == SCHEMA_VERSION {
            let canonical = format!(
                "{}/{}/{}/{}/{}/{}/{}/{}/{}/{}/{}/{}/{}/{}/{}/{}/{}/{}/{}/{}/{}",
                self.id,
                self.owner_id,
                self.creator_id,
                self.partition_id,
                sha256_hex(&self.key),
                sha256_hex(&self.value),
                self.protected,
                self.ref_only,
                self.timestamp,
                self.prev_hash,
                self.schema_version,
                self.ref1,
                self.ref2,
                self.ref3,
                self.ref4,
                self.ref5,
                self.ref6,
                self.ref7,
                self.ref8,
                self.ref9,
                self.ref10,
            );
            self.hash = sha256_hex(&canonical);
        }
        self
    }

    /// Sets `peer_hash` to `SHA256(hash ∥ "/" ∥ next_hash)`, binding this
    /// record to its successor. Only defined for schema version `"1"`.
    pub fn compute_peer_hash(&mut self, next_hash: &str) -> &mut Self {
        if self.schema_version == SCHEMA_VERSION {
            self.peer_hash = sha256_hex(&format!("{}/{}", self.hash, next_hash));
        }
        self
    }
}

/// Links a slice of records into a chain.
///
/// Every record is initialized and hashed; each record after the first takes
/// the previous record's `hash` as its `prev_hash` (re-deriving its own
/// `hash`), and each record with a successor gets its `peer_hash` bound to
/// that successor. The tail keeps an empty `peer_hash`.
///
/// Deterministic and idempotent: applying it twice to the same slice
/// re-derives the same hashes. The head's `prev_hash` is preserved when
/// already set, so callers anchor a chain by assigning
/// `records[0].prev_hash` before (or between) calls.
pub fn make_chain(objects: &mut [Object]) {
    for i in 0..objects.len() {
        objects[i].init().compute_hash();
        if i > 0 {
            let prev_hash = objects[i - 1].hash.clone();
            objects[i].prev_hash = prev_hash;
            objects[i].compute_hash();
            let next_hash = objects[i].hash.clone();
            objects[i - 1].compute_peer_hash(&next_hash);
        }
    }
}
