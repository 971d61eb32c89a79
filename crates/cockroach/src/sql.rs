//! Translates [`Query`] values into SQL text with positional binds.
//!
//! Clause composition follows the adapter contract:
//!
//! 1. the raw predicate when present, otherwise equality over the query's
//!    predicates;
//! 2. AND a `key LIKE prefix%` predicate when a key prefix is set;
//! 3. `"timestamp" DESC` first when the newest-first flag is set;
//! 4. then the explicit order clause; when neither is present, default to
//!    `"timestamp" DESC`;
//! 5. the limit when positive.

use patchain_storage::{Query, Value};

/// The `objects` column list in schema order. `key`, `value` and
/// `timestamp` are quoted; they collide with SQL keywords.
pub(crate) const COLUMNS: &str = "id, owner_id, creator_id, partition_id, \"key\", \"value\", \
     protected, ref_only, \"timestamp\", prev_hash, hash, peer_hash, schema_version, \
     ref1, ref2, ref3, ref4, ref5, ref6, ref7, ref8, ref9, ref10";

/// INSERT statement covering every column.
pub(crate) const INSERT_SQL: &str = "INSERT INTO objects (id, owner_id, creator_id, partition_id, \"key\", \"value\", \
     protected, ref_only, \"timestamp\", prev_hash, hash, peer_hash, schema_version, \
     ref1, ref2, ref3, ref4, ref5, ref6, ref7, ref8, ref9, ref10) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, \
     $14, $15, $16, $17, $18, $19, $20, $21, $22, $23)";

/// UPDATE statement for the single permitted in-place mutation.
pub(crate) const UPDATE_PEER_HASH_SQL: &str =
    "UPDATE objects SET peer_hash = $1 WHERE id = $2";

/// Probe for table existence; done by the adapter itself because the stock
/// driver path is known-broken against some backends.
pub(crate) const TABLE_PROBE_SQL: &str =
    "SELECT count(*) FROM information_schema.tables WHERE table_name = 'objects'";

/// Schema DDL: the table, the two unique indexes, and the secondary
/// indexes. Executed only when the probe reports the table absent; never
/// drops or alters.
pub(crate) const SCHEMA_SQL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS objects (\
        id VARCHAR(36) PRIMARY KEY, \
        owner_id VARCHAR(36) NOT NULL DEFAULT '', \
        creator_id VARCHAR(36) NOT NULL DEFAULT '', \
        partition_id VARCHAR(36) NOT NULL DEFAULT '', \
        \"key\" VARCHAR(64) NOT NULL DEFAULT '', \
        \"value\" VARCHAR(64000) NOT NULL DEFAULT '', \
        protected BOOL NOT NULL DEFAULT false, \
        ref_only BOOL NOT NULL DEFAULT false, \
        \"timestamp\" BIGINT NOT NULL DEFAULT 0, \
        prev_hash VARCHAR(64) NOT NULL, \
        hash VARCHAR(64) NOT NULL, \
        peer_hash VARCHAR(64) NOT NULL DEFAULT '', \
        schema_version VARCHAR(64) NOT NULL DEFAULT '', \
        ref1 VARCHAR(64) NOT NULL DEFAULT '', \
        ref2 VARCHAR(64) NOT NULL DEFAULT '', \
        ref3 VARCHAR(64) NOT NULL DEFAULT '', \
        ref4 VARCHAR(64) NOT NULL DEFAULT '', \
        ref5 VARCHAR(64) NOT NULL DEFAULT '', \
        ref6 VARCHAR(64) NOT NULL DEFAULT '', \
        ref7 VARCHAR(64) NOT NULL DEFAULT '', \
        ref8 VARCHAR(64) NOT NULL DEFAULT '', \
        ref9 VARCHAR(64) NOT NULL DEFAULT '', \
        ref10 VARCHAR(64) NOT NULL DEFAULT '')",
    // The chain link: appenders that read the same tail collide within
    // their partition, partition markers collide in the empty scope.
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_name_prev_hash ON objects (partition_id, prev_hash)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_hash ON objects (hash)",
    "CREATE INDEX IF NOT EXISTS idx_key ON objects (\"key\")",
    "CREATE INDEX IF NOT EXISTS idx_partition_id ON objects (partition_id)",
    "CREATE INDEX IF NOT EXISTS idx_creator_id ON objects (creator_id)",
    "CREATE INDEX IF NOT EXISTS idx_timestamp ON objects (\"timestamp\")",
    "CREATE INDEX IF NOT EXISTS idx_peer_hash ON objects (peer_hash)",
    "CREATE INDEX IF NOT EXISTS idx_schema_version ON objects (schema_version)",
    "CREATE INDEX IF NOT EXISTS idx_ref1 ON objects (ref1)",
    "CREATE INDEX IF NOT EXISTS idx_ref2 ON objects (ref2)",
    "CREATE INDEX IF NOT EXISTS idx_ref3 ON objects (ref3)",
    "CREATE INDEX IF NOT EXISTS idx_ref4 ON objects (ref4)",
    "CREATE INDEX IF NOT EXISTS idx_ref5 ON objects (ref5)",
    "CREATE INDEX IF NOT EXISTS idx_ref6 ON objects (ref6)",
    "CREATE INDEX IF NOT EXISTS idx_ref7 ON objects (ref7)",
    "CREATE INDEX IF NOT EXISTS idx_ref8 ON objects (ref8)",
    "CREATE INDEX IF NOT EXISTS idx_ref9 ON objects (ref9)",
    "CREATE INDEX IF NOT EXISTS idx_ref10 ON objects (ref10)",
];

/// Quotes columns that collide with SQL keywords.
fn quoted(column: &str) -> String {
    match column {
        "key" | "value" | "timestamp" => format!("\"{column}\""),
        other => other.to_string(),
    }
}

/// Rewrites `?` placeholders of a raw expression into `$n` positions,
/// starting after `offset` existing binds.
fn rewrite_placeholders(expr: &str, offset: usize) -> String {
    let mut out = String::with_capacity(expr.len() + 4);
    let mut n = offset;
    for ch in expr.chars() {
        if ch == '?' {
            n += 1;
            out.push('$');
            out.push_str(&n.to_string());
        } else {
            out.push(ch);
        }
    }
    out
}

/// The WHERE clause and its binds, or an empty clause for a match-all
/// query.
fn build_where(query: &Query) -> (String, Vec<Value>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();

    if let Some(raw) = query.raw_expr() {
        clauses.push(format!("({})", rewrite_placeholders(&raw.expr, binds.len())));
        binds.extend(raw.args.iter().cloned());
    } else {
        for (field, value) in query.equalities() {
            binds.push(value.clone());
            clauses.push(format!("{} = ${}", quoted(field.column()), binds.len()));
        }
    }

    if let Some(prefix) = query.key_prefix() {
        binds.push(Value::Text(format!("{prefix}%")));
        clauses.push(format!("\"key\" LIKE ${}", binds.len()));
    }

    (clauses.join(" AND "), binds)
}

/// The ORDER BY clause per composition rules 3 and 4.
fn build_order(query: &Query) -> String {
    let mut parts: Vec<String> = Vec::new();
    if query.is_newest_first() {
        parts.push("\"timestamp\" DESC".to_string());
    }
    if let Some(order) = query.explicit_order() {
        if !order.is_empty() {
            parts.push(order.to_string());
        }
    }
    if parts.is_empty() {
        parts.push("\"timestamp\" DESC".to_string());
    }
    format!(" ORDER BY {}", parts.join(", "))
}

/// A SELECT over the full column list.
pub(crate) fn build_select(query: &Query) -> (String, Vec<Value>) {
    let (where_sql, binds) = build_where(query);
    let mut sql = format!("SELECT {COLUMNS} FROM objects");
    if !where_sql.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_sql);
    }
    sql.push_str(&build_order(query));
    if query.get_limit() > 0 {
        sql.push_str(&format!(" LIMIT {}", query.get_limit()));
    }
    (sql, binds)
}

/// A COUNT over the same predicates, without ordering.
pub(crate) fn build_count(query: &Query) -> (String, Vec<Value>) {
    let (where_sql, binds) = build_where(query);
    let mut sql = "SELECT count(*) FROM objects".to_string();
    if !where_sql.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_sql);
    }
    (sql, binds)
}
