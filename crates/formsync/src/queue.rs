//! The local queue of pending submissions.
//!
//! [`LocalQueue`] is the async face of [`Storage`]: a cheap, cloneable handle
//! whose operations run on tokio's blocking pool so that callers never stall
//! on disk I/O. Every clone shares one connection.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::{Error, Result};
use crate::record::{DeadLetter, Submission, SubmissionRecord};
use crate::storage::{RejectionOutcome, Storage, StorageStats};

/// Handle to the persistent queue of not-yet-synced submissions.
#[derive(Debug, Clone)]
pub struct LocalQueue {
    path: PathBuf,
    storage: Arc<Mutex<Storage>>,
}

impl LocalQueue {
    /// Open (creating if absent) the queue store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageUnavailable`] when the database cannot be
    /// opened. Callers treat this as losing offline capability only.
    pub async fn initialize(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let open_path = path.clone();
        let storage = tokio::task::spawn_blocking(move || Storage::open(open_path))
            .await
            .map_err(|e| {
                Error::storage_unavailable(
                    &path,
                    Error::internal(format!("queue store open task failed: {e}")),
                )
            })??;
        Ok(Self::from_storage(storage, path))
    }

    /// Open a throwaway in-memory queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn in_memory() -> Result<Self> {
        let storage = Storage::open_in_memory()?;
        Ok(Self::from_storage(storage, PathBuf::from(":memory:")))
    }

    fn from_storage(storage: Storage, path: PathBuf) -> Self {
        Self {
            path,
            storage: Arc::new(Mutex::new(storage)),
        }
    }

    /// Path of the underlying database.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the store on the blocking pool.
    async fn with_storage<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Storage) -> Result<T> + Send + 'static,
    {
        let storage = Arc::clone(&self.storage);
        tokio::task::spawn_blocking(move || {
            let guard = storage
                .lock()
                .map_err(|_| Error::internal("queue store lock poisoned"))?;
            f(&guard)
        })
        .await
        .map_err(|e| Error::internal(format!("queue store task failed: {e}")))?
    }

    /// Insert a record, or update it in place if its key is already queued.
    ///
    /// Returns the record's key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn enqueue(&self, record: SubmissionRecord) -> Result<i64> {
        let key = self.with_storage(move |s| s.upsert(&record)).await?;
        debug!("Enqueued record {}", key);
        Ok(key)
    }

    /// Replace the fields of a still-pending record.
    ///
    /// Returns `false` if the key is no longer queued.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn update_pending(&self, key: i64, submission: Submission) -> Result<bool> {
        self.with_storage(move |s| s.update_pending(key, &submission))
            .await
    }

    /// Every pending record, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn list_all(&self) -> Result<Vec<SubmissionRecord>> {
        self.with_storage(Storage::list_all).await
    }

    /// Delete the record with `key`; absent keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn remove(&self, key: i64) -> Result<()> {
        let removed = self.with_storage(move |s| s.remove(key)).await?;
        if !removed {
            debug!("Record {} already gone from the queue", key);
        }
        Ok(())
    }

    /// A single pending record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn get(&self, key: i64) -> Result<Option<SubmissionRecord>> {
        self.with_storage(move |s| s.get(key)).await
    }

    /// Number of pending records.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn count(&self) -> Result<i64> {
        self.with_storage(Storage::count).await
    }

    /// Whether nothing is waiting for delivery.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.count().await? == 0)
    }

    /// Remember a delivery error without counting it as an attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn note_error(&self, key: i64, error: String) -> Result<()> {
        self.with_storage(move |s| s.note_error(key, &error)).await
    }

    /// Count a remote rejection, dead-lettering after `max_attempts`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn record_rejection(
        &self,
        key: i64,
        error: String,
        max_attempts: u32,
    ) -> Result<RejectionOutcome> {
        self.with_storage(move |s| s.record_rejection(key, &error, max_attempts))
            .await
    }

    /// Records given up on after repeated rejections.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        self.with_storage(Storage::dead_letters).await
    }

    /// Move a dead letter back into the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn requeue_dead_letter(&self, key: i64) -> Result<bool> {
        self.with_storage(move |s| s.requeue_dead_letter(key)).await
    }

    /// Drop a dead letter.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn discard_dead_letter(&self, key: i64) -> Result<bool> {
        self.with_storage(move |s| s.discard_dead_letter(key)).await
    }

    /// Persist a background sync registration.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn register_sync(&self, tag: String) -> Result<bool> {
        self.with_storage(move |s| s.register_sync(&tag)).await
    }

    /// Consume every background sync registration.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn take_registrations(&self) -> Result<Vec<String>> {
        self.with_storage(Storage::take_registrations).await
    }

    /// Queue statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn stats(&self) -> Result<StorageStats> {
        self.with_storage(Storage::stats).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::record::Submission;

    fn sample(name: &str) -> Submission {
        Submission::new(name, "a@x.com", "123", "cot")
            .with_date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
    }

    #[tokio::test]
    async fn test_enqueue_then_list_all_round_trip() {
        let queue = LocalQueue::in_memory().unwrap();
        let submission = sample("A");

        queue
            .enqueue(SubmissionRecord::new(submission.clone()))
            .await
            .unwrap();

        let records = queue.list_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].submission, submission);
        assert!(records[0].key.is_some());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let queue = LocalQueue::in_memory().unwrap();
        let key = queue.enqueue(SubmissionRecord::new(sample("A"))).await.unwrap();
        queue.enqueue(SubmissionRecord::new(sample("B"))).await.unwrap();

        queue.remove(key).await.unwrap();
        let once = queue.list_all().await.unwrap();
        queue.remove(key).await.unwrap();
        let twice = queue.list_all().await.unwrap();

        assert_eq!(once, twice);
        assert_eq!(twice.len(), 1);
    }

    #[tokio::test]
    async fn test_clones_share_the_store() {
        let queue = LocalQueue::in_memory().unwrap();
        let other = queue.clone();

        queue.enqueue(SubmissionRecord::new(sample("A"))).await.unwrap();
        assert_eq!(other.count().await.unwrap(), 1);
        assert!(!other.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_initialize_on_disk_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");

        {
            let queue = LocalQueue::initialize(&path).await.unwrap();
            queue.enqueue(SubmissionRecord::new(sample("A"))).await.unwrap();
            assert_eq!(queue.path(), path);
        }

        let reopened = LocalQueue::initialize(&path).await.unwrap();
        let records = reopened.list_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].submission.name, "A");
    }

    #[tokio::test]
    async fn test_initialize_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = LocalQueue::initialize(dir.path()).await.unwrap_err();
        assert!(err.is_storage_unavailable(), "got {err:?}");
    }

    #[tokio::test]
    async fn test_registrations_round_trip() {
        let queue = LocalQueue::in_memory().unwrap();
        assert!(queue.register_sync("sync-form".to_string()).await.unwrap());
        assert_eq!(
            queue.take_registrations().await.unwrap(),
            vec!["sync-form".to_string()]
        );
    }
}
