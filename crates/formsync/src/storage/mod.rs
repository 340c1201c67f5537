//! Storage layer for formsync.
//!
//! This module provides the `SQLite`-backed record store behind the local
//! queue: pending submissions, dead letters, and background sync
//! registrations all live in one database file.
//!
//! [`Storage`] is synchronous; async callers go through
//! [`crate::queue::LocalQueue`], which runs these calls on the blocking pool.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::record::{DeadLetter, Submission, SubmissionRecord};

/// Columns shared by `pending_submissions` and `dead_letters`, in row order.
const RECORD_COLUMNS: &str = "key, name, email, mobile, product, submission_date, \
                              queued_at, attempts, last_error, idempotency_key";

/// What happened to a record after the remote endpoint rejected it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionOutcome {
    /// The record stays queued with the given attempt count.
    Retained {
        /// Rejections so far, including this one.
        attempts: u32,
    },
    /// The record reached the attempt limit and moved to the dead letters.
    DeadLettered,
    /// No pending record has that key (already removed elsewhere).
    Missing,
}

/// Record store for pending submissions.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageUnavailable`] for any failure to create the
    /// directory, open the file, configure the connection or bring the schema
    /// up to date.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Self::connect(&path).map_err(|e| Error::storage_unavailable(&path, e))?;

        info!("Queue store opened at {}", path.display());
        Ok(Self { path, conn })
    }

    fn connect(path: &Path) -> Result<Connection> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening queue store at {}", path.display());
        let conn = Connection::open(path)?;

        // WAL lets the daemon and a foreground command share the file.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        migrations::initialize_schema(&conn)?;
        Ok(conn)
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::storage_unavailable(":memory:", e))?;
        migrations::initialize_schema(&conn)
            .map_err(|e| Error::storage_unavailable(":memory:", e))?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert a record, or update it in place when its key already exists.
    ///
    /// A record without a key gets one assigned. Updating resets the attempt
    /// counter and last error but keeps the original `queued_at` and
    /// idempotency key. Returns the record's key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn upsert(&self, record: &SubmissionRecord) -> Result<i64> {
        let submission = &record.submission;
        self.conn.execute(
            r"
            INSERT INTO pending_submissions
                (key, name, email, mobile, product, submission_date,
                 queued_at, attempts, last_error, idempotency_key)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(key) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                mobile = excluded.mobile,
                product = excluded.product,
                submission_date = excluded.submission_date,
                attempts = 0,
                last_error = NULL
            ",
            params![
                record.key,
                submission.name,
                submission.email,
                submission.mobile,
                submission.product,
                submission.date.to_string(),
                record.queued_at.to_rfc3339(),
                record.attempts,
                record.last_error,
                record.idempotency_key,
            ],
        )?;

        let key = record.key.unwrap_or_else(|| self.conn.last_insert_rowid());
        debug!("Upserted pending record with key {}", key);
        Ok(key)
    }

    /// Replace the fields of a record that is still pending.
    ///
    /// Resets the attempt count and last error; `queued_at` and the
    /// idempotency key are kept. Returns `false` if no record has this key,
    /// so an edit never brings a delivered record back.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn update_pending(&self, key: i64, submission: &Submission) -> Result<bool> {
        let changed = self.conn.execute(
            r"
            UPDATE pending_submissions SET
                name = ?2,
                email = ?3,
                mobile = ?4,
                product = ?5,
                submission_date = ?6,
                attempts = 0,
                last_error = NULL
            WHERE key = ?1
            ",
            params![
                key,
                submission.name,
                submission.email,
                submission.mobile,
                submission.product,
                submission.date.to_string(),
            ],
        )?;
        debug!("Updated pending record {}: {} row(s)", key, changed);
        Ok(changed > 0)
    }

    /// Get a pending record by its key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get(&self, key: i64) -> Result<Option<SubmissionRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM pending_submissions WHERE key = ?1");
        let record = self
            .conn
            .query_row(&sql, [key], Self::row_to_record)
            .optional()?;
        Ok(record)
    }

    /// Get every pending record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list_all(&self) -> Result<Vec<SubmissionRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM pending_submissions");
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map([], Self::row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Count pending records.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self) -> Result<i64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM pending_submissions", [], |row| {
                    row.get(0)
                })?;
        Ok(count)
    }

    /// Delete a pending record by key.
    ///
    /// Returns `true` if a record was deleted, `false` if there was none.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn remove(&self, key: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM pending_submissions WHERE key = ?1", [key])?;
        Ok(affected > 0)
    }

    /// Remember the latest error for a record without counting an attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn note_error(&self, key: i64, error: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE pending_submissions SET last_error = ?2 WHERE key = ?1",
            params![key, error],
        )?;
        Ok(())
    }

    /// Count a remote rejection against a record.
    ///
    /// Once the record has been rejected `max_attempts` times it moves to the
    /// dead-letter table. A `max_attempts` of zero never dead-letters.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn record_rejection(
        &self,
        key: i64,
        error: &str,
        max_attempts: u32,
    ) -> Result<RejectionOutcome> {
        let tx = self.conn.unchecked_transaction()?;

        let updated = tx.execute(
            "UPDATE pending_submissions SET attempts = attempts + 1, last_error = ?2 WHERE key = ?1",
            params![key, error],
        )?;
        if updated == 0 {
            tx.commit()?;
            return Ok(RejectionOutcome::Missing);
        }

        let attempts: i64 = tx.query_row(
            "SELECT attempts FROM pending_submissions WHERE key = ?1",
            [key],
            |row| row.get(0),
        )?;
        let attempts = u32::try_from(attempts).unwrap_or(u32::MAX);

        if max_attempts > 0 && attempts >= max_attempts {
            let copy = format!(
                "INSERT OR REPLACE INTO dead_letters ({RECORD_COLUMNS}, failed_at) \
                 SELECT {RECORD_COLUMNS}, ?2 FROM pending_submissions WHERE key = ?1"
            );
            tx.execute(&copy, params![key, Utc::now().to_rfc3339()])?;
            tx.execute("DELETE FROM pending_submissions WHERE key = ?1", [key])?;
            tx.commit()?;
            warn!(
                "Record {} rejected {} times, moved to dead letters",
                key, attempts
            );
            return Ok(RejectionOutcome::DeadLettered);
        }

        tx.commit()?;
        Ok(RejectionOutcome::Retained { attempts })
    }

    /// Get every dead-lettered record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        let sql = format!("SELECT {RECORD_COLUMNS}, failed_at FROM dead_letters ORDER BY key");
        let mut stmt = self.conn.prepare(&sql)?;
        let letters = stmt
            .query_map([], |row| {
                let record = Self::row_to_record(row)?;
                let failed_at = parse_timestamp(row, 10)?;
                Ok(DeadLetter { record, failed_at })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(letters)
    }

    /// Move a dead letter back into the queue with a fresh attempt counter.
    ///
    /// Returns `false` if there is no dead letter with that key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn requeue_dead_letter(&self, key: i64) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let moved = tx.execute(
            r"
            INSERT OR REPLACE INTO pending_submissions
                (key, name, email, mobile, product, submission_date,
                 queued_at, attempts, last_error, idempotency_key)
            SELECT key, name, email, mobile, product, submission_date,
                   queued_at, 0, NULL, idempotency_key
            FROM dead_letters WHERE key = ?1
            ",
            [key],
        )?;
        tx.execute("DELETE FROM dead_letters WHERE key = ?1", [key])?;
        tx.commit()?;

        if moved > 0 {
            info!("Requeued dead letter {}", key);
        }
        Ok(moved > 0)
    }

    /// Drop a dead letter for good.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn discard_dead_letter(&self, key: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM dead_letters WHERE key = ?1", [key])?;
        Ok(affected > 0)
    }

    /// Register a background sync tag.
    ///
    /// Registering a tag that is already registered coalesces with the
    /// existing registration. Returns `true` for a new registration.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn register_sync(&self, tag: &str) -> Result<bool> {
        let affected = self.conn.execute(
            "INSERT INTO sync_registrations (tag, registered_at) VALUES (?1, ?2) \
             ON CONFLICT(tag) DO NOTHING",
            params![tag, Utc::now().to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    /// Remove and return every registered tag.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn take_registrations(&self) -> Result<Vec<String>> {
        let tx = self.conn.unchecked_transaction()?;
        let tags = {
            let mut stmt =
                tx.prepare("SELECT tag FROM sync_registrations ORDER BY registered_at")?;
            let tags = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            tags
        };
        tx.execute("DELETE FROM sync_registrations", [])?;
        tx.commit()?;
        Ok(tags)
    }

    /// Get queue statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let pending = self.count()?;
        let dead_letters: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM dead_letters", [], |row| row.get(0))?;
        let registrations: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM sync_registrations", [], |row| {
                    row.get(0)
                })?;

        let oldest: Option<String> = self
            .conn
            .query_row(
                "SELECT queued_at FROM pending_submissions ORDER BY queued_at ASC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let oldest_pending = oldest
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            pending,
            dead_letters,
            registrations,
            oldest_pending,
            db_size_bytes,
        })
    }

    /// Convert a database row to a `SubmissionRecord`.
    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<SubmissionRecord> {
        let key: i64 = row.get(0)?;
        let date_str: String = row.get(5)?;
        let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;
        let attempts: i64 = row.get(7)?;

        Ok(SubmissionRecord {
            key: Some(key),
            submission: Submission {
                name: row.get(1)?,
                email: row.get(2)?,
                mobile: row.get(3)?,
                product: row.get(4)?,
                date,
            },
            remote_id: None,
            submitted_at: None,
            queued_at: parse_timestamp(row, 6)?,
            attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
            last_error: row.get(8)?,
            idempotency_key: row.get(9)?,
        })
    }
}

fn parse_timestamp(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Statistics about the queue store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Records waiting for delivery.
    pub pending: i64,
    /// Records given up on after repeated rejections.
    pub dead_letters: i64,
    /// Outstanding background sync registrations.
    pub registrations: i64,
    /// Enqueue time of the oldest pending record.
    pub oldest_pending: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}
