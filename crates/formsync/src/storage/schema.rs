//! `SQLite` schema definitions for formsync.
//!
//! This module contains the SQL statements for creating the local queue
//! store and its bookkeeping tables.

/// SQL statement to create the pending submissions table.
///
/// `key` is the local key: `NULL` on insert means "assign one".
pub const CREATE_PENDING_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS pending_submissions (
    key INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    email TEXT NOT NULL,
    mobile TEXT NOT NULL,
    product TEXT NOT NULL,
    submission_date TEXT NOT NULL,
    queued_at TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    idempotency_key TEXT NOT NULL
)
";

/// SQL statement to create the dead-letter table.
pub const CREATE_DEAD_LETTERS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS dead_letters (
    key INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT NOT NULL,
    mobile TEXT NOT NULL,
    product TEXT NOT NULL,
    submission_date TEXT NOT NULL,
    queued_at TEXT NOT NULL,
    attempts INTEGER NOT NULL,
    last_error TEXT,
    idempotency_key TEXT NOT NULL,
    failed_at TEXT NOT NULL
)
";

/// SQL statement to create the background sync registration table.
pub const CREATE_REGISTRATIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS sync_registrations (
    tag TEXT PRIMARY KEY,
    registered_at TEXT NOT NULL
)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_PENDING_TABLE,
    CREATE_DEAD_LETTERS_TABLE,
    CREATE_REGISTRATIONS_TABLE,
    CREATE_METADATA_TABLE,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statements_not_empty() {
        assert!(!SCHEMA_STATEMENTS.is_empty());
        for stmt in SCHEMA_STATEMENTS {
            assert!(!stmt.is_empty());
        }
    }

    #[test]
    fn test_pending_table_contains_record_columns() {
        for column in [
            "key INTEGER PRIMARY KEY AUTOINCREMENT",
            "name TEXT NOT NULL",
            "email TEXT NOT NULL",
            "mobile TEXT NOT NULL",
            "product TEXT NOT NULL",
            "submission_date TEXT NOT NULL",
            "idempotency_key TEXT NOT NULL",
        ] {
            assert!(CREATE_PENDING_TABLE.contains(column), "missing {column}");
        }
    }

    #[test]
    fn test_dead_letter_key_is_not_autoincrement() {
        assert!(CREATE_DEAD_LETTERS_TABLE.contains("key INTEGER PRIMARY KEY,"));
        assert!(CREATE_DEAD_LETTERS_TABLE.contains("failed_at TEXT NOT NULL"));
    }

    #[test]
    fn test_registrations_keyed_by_tag() {
        assert!(CREATE_REGISTRATIONS_TABLE.contains("tag TEXT PRIMARY KEY"));
    }
}
