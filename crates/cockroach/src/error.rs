//! Maps sqlx driver errors onto the canonical store taxonomy.
//!
//! CockroachDB signals SERIALIZABLE restarts with SQLSTATE `40001` and
//! unique violations with `23505`; both are classified structurally here.
//! Anything else keeps its driver message verbatim so the substring-based
//! retry fallback still works against backends this mapping does not know.

use patchain_storage::StoreError;
use sqlx::error::DatabaseError;

/// Converts any sqlx error into a [`StoreError`].
pub(crate) fn map_sqlx_err(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::Database(db_err) => map_database_err(db_err.as_ref()),
        other => {
            let message = other.to_string();
            StoreError::backend_with_source(message, other)
        }
    }
}

fn map_database_err(db_err: &dyn DatabaseError) -> StoreError {
    let code = db_err.code().map(|c| c.to_string());
    classify(code.as_deref(), db_err.constraint(), db_err.message())
}

/// Classifies a database error from its SQLSTATE, constraint name and
/// message. Split out from the driver types so the table is testable.
pub(crate) fn classify(
    code: Option<&str>,
    constraint: Option<&str>,
    message: &str,
) -> StoreError {
    match code {
        // serialization_failure: the backend wants the transaction replayed.
        Some("40001") => StoreError::serialization_restart(message),
        // unique_violation: name the constraint so the retry predicate can
        // single out the chain link.
        Some("23505") => {
            let constraint = constraint
                .map(str::to_string)
                .or_else(|| constraint_from_message(message))
                .unwrap_or_default();
            StoreError::unique_violation(constraint, message)
        }
        _ => StoreError::backend(message),
    }
}

/// Extracts a constraint name from a `violates unique constraint "…"`
/// message, for drivers that do not expose the constraint structurally.
fn constraint_from_message(message: &str) -> Option<String> {
    let (_, rest) = message.split_once("violates unique constraint \"")?;
    let (name, _) = rest.split_once('"')?;
    Some(name.to_string())
}
