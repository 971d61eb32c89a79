//! Typed query model for store-adapter reads.
//!
//! A [`Query`] is an explicit filter builder over the record's columns: a
//! set of equality predicates on typed [`Field`]s, an optional raw predicate
//! with positional arguments, a `key`-prefix predicate, ordering and a
//! limit. No runtime reflection over the record type is involved.
//!
//! # Composition rules
//!
//! Adapters translate a query into clauses in this order:
//!
//! 1. the raw predicate when present, otherwise the equality predicates;
//! 2. AND a `key LIKE prefix%` predicate when `key_starts_with` is set;
//! 3. `timestamp DESC` first when [`newest_first`](Query::newest_first) is
//!    set;
//! 4. then the explicit `order_by`; when neither an order nor the
//!    newest-first flag is present, default to `timestamp DESC`;
//! 5. the limit when positive.

use crate::object::Object;

/// Columns of the `objects` table that queries can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Id,
    OwnerId,
    CreatorId,
    PartitionId,
    Key,
    Value,
    Protected,
    RefOnly,
    Timestamp,
    PrevHash,
    Hash,
    PeerHash,
    SchemaVersion,
    Ref1,
    Ref2,
    Ref3,
    Ref4,
    Ref5,
    Ref6,
    Ref7,
    Ref8,
    Ref9,
    Ref10,
}

impl Field {
    /// Every field, in schema order.
    pub const ALL: &'static [Field] = &[
        Field::Id,
        Field::OwnerId,
        Field::CreatorId,
        Field::PartitionId,
        Field::Key,
        Field::Value,
        Field::Protected,
        Field::RefOnly,
        Field::Timestamp,
        Field::PrevHash,
        Field::Hash,
        Field::PeerHash,
        Field::SchemaVersion,
        Field::Ref1,
        Field::Ref2,
        Field::Ref3,
        Field::Ref4,
        Field::Ref5,
        Field::Ref6,
        Field::Ref7,
        Field::Ref8,
        Field::Ref9,
        Field::Ref10,
    ];

    /// The column / JSON name of the field.
    #[must_use]
    pub fn column(self) -> &'static str {
        match self {
            Field::Id => "id",
            Field::OwnerId => "owner_id",
            Field::CreatorId => "creator_id",
            Field::PartitionId => "partition_id",
            Field::Key => "key",
            Field::Value => "value",
            Field::Protected => "protected",
            Field::RefOnly => "ref_only",
            Field::Timestamp => "timestamp",
            Field::PrevHash => "prev_hash",
            Field::Hash => "hash",
            Field::PeerHash => "peer_hash",
            Field::SchemaVersion => "schema_version",
            Field::Ref1 => "ref1",
            Field::Ref2 => "ref2",
            Field::Ref3 => "ref3",
            Field::Ref4 => "ref4",
            Field::Ref5 => "ref5",
            Field::Ref6 => "ref6",
            Field::Ref7 => "ref7",
            Field::Ref8 => "ref8",
            Field::Ref9 => "ref9",
            Field::Ref10 => "ref10",
        }
    }

    /// The field's value on a concrete record.
    #[must_use]
    pub fn value_of(self, obj: &Object) -> Value {
        match self {
            Field::Id => Value::Text(obj.id.clone()),
            Field::OwnerId => Value::Text(obj.owner_id.clone()),
            Field::CreatorId => Value::Text(obj.creator_id.clone()),
            Field::PartitionId => Value::Text(obj.partition_id.clone()),
            Field::Key => Value::Text(obj.key.clone()),
            Field::Value => Value::Text(obj.value.clone()),
            Field::Protected => Value::Bool(obj.protected),
            Field::RefOnly => Value::Bool(obj.ref_only),
            Field::Timestamp => Value::Int(obj.timestamp),
            Field::PrevHash => Value::Text(obj.prev_hash.clone()),
            Field::Hash => Value::Text(obj.hash.clone()),
            Field::PeerHash => Value::Text(obj.peer_hash.clone()),
            Field::SchemaVersion => Value::Text(obj.schema_version.clone()),
            Field::Ref1 => Value::Text(obj.ref1.clone()),
            Field::Ref2 => Value::Text(obj.ref2.clone()),
            Field::Ref3 => Value::Text(obj.ref3.clone()),
            Field::Ref4 => Value::Text(obj.ref4.clone()),
            Field::Ref5 => Value::Text(obj.ref5.clone()),
            Field::Ref6 => Value::Text(obj.ref6.clone()),
            Field::Ref7 => Value::Text(obj.ref7.clone()),
            Field::Ref8 => Value::Text(obj.ref8.clone()),
            Field::Ref9 => Value::Text(obj.ref9.clone()),
            Field::Ref10 => Value::Text(obj.ref10.clone()),
        }
    }
}

/// A bindable predicate value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(String),
    Bool(bool),
    Int(i64),
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

/// A raw predicate with positional `?` placeholders.
///
/// Adapters rewrite placeholders into their native binding syntax. When a
/// raw predicate is present it replaces the equality predicates entirely
/// (composition rule 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawExpr {
    pub expr: String,
    pub args: Vec<Value>,
}

/// Filter / order / limit description for a read operation.
///
/// # Example
///
/// ```
/// use patchain_storage::query::{Field, Query};
///
/// let q = Query::new()
///     .eq(Field::OwnerId, "owner-1")
///     .key_starts_with("partition/")
///     .newest_first();
/// assert_eq!(q.equalities().len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    eq: Vec<(Field, Value)>,
    raw: Option<RawExpr>,
    key_starts_with: Option<String>,
    order_by: Option<String>,
    limit: i64,
    newest_first: bool,
}

impl Query {
    /// An empty query matching every record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an equality predicate on `field`.
    #[must_use]
    pub fn eq(mut self, field: Field, value: impl Into<Value>) -> Self {
        self.eq.push((field, value.into()));
        self
    }

    /// Equality on `key`.
    #[must_use]
    pub fn key(self, key: impl Into<String>) -> Self {
        self.eq(Field::Key, key.into())
    }

    /// Equality on `owner_id`.
    #[must_use]
    pub fn owner(self, owner_id: impl Into<String>) -> Self {
        self.eq(Field::OwnerId, owner_id.into())
    }

    /// Equality on `partition_id`.
    #[must_use]
    pub fn partition(self, partition_id: impl Into<String>) -> Self {
        self.eq(Field::PartitionId, partition_id.into())
    }

    /// Replaces the equality predicates with a raw predicate using `?`
    /// placeholders.
    #[must_use]
    pub fn raw(mut self, expr: impl Into<String>, args: Vec<Value>) -> Self {
        self.raw = Some(RawExpr { expr: expr.into(), args });
        self
    }

    /// ANDs a `key LIKE prefix%` predicate.
    #[must_use]
    pub fn key_starts_with(mut self, prefix: impl Into<String>) -> Self {
        self.key_starts_with = Some(prefix.into());
        self
    }

    /// Appends an explicit order clause (adapter syntax).
    #[must_use]
    pub fn order_by(mut self, order: impl Into<String>) -> Self {
        self.order_by = Some(order.into());
        self
    }

    /// Orders by `timestamp DESC` ahead of any explicit order clause. Reads
    /// that resolve a chain tail set this for a deterministic tie-break.
    #[must_use]
    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }

    /// Caps the number of returned records when `limit > 0`.
    #[must_use]
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    // Accessors used by adapters.

    #[must_use]
    pub fn equalities(&self) -> &[(Field, Value)] {
        &self.eq
    }

    #[must_use]
    pub fn raw_expr(&self) -> Option<&RawExpr> {
        self.raw.as_ref()
    }

    #[must_use]
    pub fn key_prefix(&self) -> Option<&str> {
        self.key_starts_with.as_deref()
    }

    #[must_use]
    pub fn explicit_order(&self) -> Option<&str> {
        self.order_by.as_deref()
    }

    #[must_use]
    pub fn get_limit(&self) -> i64 {
        self.limit
    }

    #[must_use]
    pub fn is_newest_first(&self) -> bool {
        self.newest_first
    }
}

/// Fields the external structured-query parser may not reference.
///
/// `partition_id` is always withheld — partition membership is an engine
/// concern. Deployments commonly extend this with `creator_id` and
/// `schema_version`.
pub const DEFAULT_FIELD_BLACKLIST: &[&str] = &["partition_id"];

/// Enumerates the JSON field names of a record, excluding `blacklist`.
///
/// This list is the schema surface handed to the external structured-query
/// parser.
#[must_use]
pub fn queryable_fields(blacklist: &[&str]) -> Vec<&'static str> {
    Field::ALL
        .iter()
        .map(|f| f.column())
        .filter(|name| !blacklist.contains(name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_accumulates_predicates() {
        let q = Query::new()
            .owner("o1")
            .key_starts_with("partition/")
            .newest_first()
            .limit(5);

        assert_eq!(
            q.equalities(),
            &[(Field::OwnerId, Value::Text("o1".into()))]
        );
        assert_eq!(q.key_prefix(), Some("partition/"));
        assert!(q.is_newest_first());
        assert_eq!(q.get_limit(), 5);
    }

    #[test]
    fn raw_expr_carries_positional_args() {
        let q = Query::new().raw("timestamp > ? AND protected = ?", vec![
            Value::Int(10),
            Value::Bool(true),
        ]);

        let raw = q.raw_expr().expect("raw expr set");
        assert_eq!(raw.expr, "timestamp > ? AND protected = ?");
        assert_eq!(raw.args.len(), 2);
    }

    #[test]
    fn queryable_fields_excludes_blacklist() {
        let fields = queryable_fields(DEFAULT_FIELD_BLACKLIST);
        assert!(!fields.contains(&"partition_id"));
        assert!(fields.contains(&"key"));
        assert!(fields.contains(&"ref10"));
        assert_eq!(fields.len(), Field::ALL.len() - 1);
    }

    #[test]
    fn queryable_fields_supports_wider_blacklists() {
        let fields = queryable_fields(&["partition_id", "creator_id", "schema_version"]);
        assert!(!fields.contains(&"creator_id"));
        assert!(!fields.contains(&"schema_version"));
        assert_eq!(fields.len(), Field::ALL.len() - 3);
    }

    #[test]
    fn field_value_of_extracts_typed_values() {
        let obj = Object {
            owner_id: "o".into(),
            protected: true,
            timestamp: 7,
            ..Object::default()
        };

        assert_eq!(Field::OwnerId.value_of(&obj), Value::Text("o".into()));
        assert_eq!(Field::Protected.value_of(&obj), Value::Bool(true));
        assert_eq!(Field::Timestamp.value_of(&obj), Value::Int(7));
    }
}
