//! Draining the local queue to the remote endpoint.
//!
//! A pass reads the whole queue, then delivers records one at a time. A record
//! is removed only after the endpoint confirmed it; every other outcome leaves
//! it queued for the next pass. One record failing never stops the others.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::SubmissionApi;
use crate::error::Result;
use crate::queue::LocalQueue;
use crate::storage::RejectionOutcome;

/// Outcome of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Records found in the queue when the pass started.
    pub attempted: usize,
    /// Records delivered and removed from the queue.
    pub synced: usize,
    /// Records left queued after a failed delivery.
    pub failed: usize,
    /// Of the failed records, those whose delivery got no answer at all.
    pub unreachable: usize,
    /// Records moved to the dead letters during this pass.
    pub dead_lettered: usize,
    /// The pass did not run because another one was in progress.
    pub skipped: bool,
}

impl SyncReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    /// Whether the work should run again later: the pass was skipped, or
    /// the endpoint could not be reached for some record.
    #[must_use]
    pub fn needs_retry(&self) -> bool {
        self.skipped || self.unreachable > 0
    }

    /// Whether every record found was delivered.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.skipped && self.synced == self.attempted
    }

    /// One-line human summary.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.skipped {
            return "Sync already in progress".to_string();
        }
        if self.attempted == 0 {
            return "Nothing to sync".to_string();
        }
        let mut line = format!(
            "Synced {} of {} pending submission(s)",
            self.synced, self.attempted
        );
        if self.dead_lettered > 0 {
            line.push_str(&format!(", {} moved to dead letters", self.dead_lettered));
        }
        line
    }
}

/// Delivers queued records through a [`SubmissionApi`].
///
/// Clones share the pass guard, so overlapping passes within one process are
/// skipped rather than run twice.
#[derive(Debug, Clone)]
pub struct SyncWorker {
    queue: LocalQueue,
    api: Arc<dyn SubmissionApi>,
    max_attempts: u32,
    pass_guard: Arc<Mutex<()>>,
}

impl SyncWorker {
    /// Create a worker. `max_attempts` of 0 retries rejected records forever.
    #[must_use]
    pub fn new(queue: LocalQueue, api: Arc<dyn SubmissionApi>, max_attempts: u32) -> Self {
        Self {
            queue,
            api,
            max_attempts,
            pass_guard: Arc::new(Mutex::new(())),
        }
    }

    /// The queue this worker drains.
    #[must_use]
    pub fn queue(&self) -> &LocalQueue {
        &self.queue
    }

    /// Hold the pass guard as a concurrent pass would.
    #[cfg(test)]
    pub(crate) fn hold_pass(&self) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        self.pass_guard.try_lock().ok()
    }

    /// Run one pass over the queue.
    ///
    /// Per-record delivery failures are part of the report, not errors.
    ///
    /// # Errors
    ///
    /// Returns an error only if the queue store itself fails.
    pub async fn run_pass(&self) -> Result<SyncReport> {
        let Ok(_guard) = self.pass_guard.try_lock() else {
            debug!("Sync pass already running, skipping");
            return Ok(SyncReport::skipped());
        };

        let records = self.queue.list_all().await?;
        let mut report = SyncReport {
            attempted: records.len(),
            ..SyncReport::default()
        };
        if records.is_empty() {
            debug!("Queue is empty, nothing to sync");
            return Ok(report);
        }

        info!("Syncing {} pending submission(s)", records.len());

        for record in records {
            let Some(key) = record.key else {
                continue;
            };

            match self
                .api
                .create(&record.submission, Some(&record.idempotency_key))
                .await
            {
                Ok(delivery) => {
                    self.queue.remove(key).await?;
                    report.synced += 1;
                    debug!(
                        "Record {} delivered (remote id {:?})",
                        key, delivery.remote_id
                    );
                }
                Err(e) if e.is_remote_rejection() => {
                    report.failed += 1;
                    warn!("Record {} rejected: {}", key, e);
                    let outcome = self
                        .queue
                        .record_rejection(key, e.to_string(), self.max_attempts)
                        .await?;
                    if outcome == RejectionOutcome::DeadLettered {
                        report.dead_lettered += 1;
                        warn!("Record {} moved to dead letters", key);
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    report.unreachable += 1;
                    warn!("Record {} not delivered: {}", key, e);
                    self.queue.note_error(key, e.to_string()).await?;
                }
            }
        }

        info!("{}", report.summary());
        Ok(report)
    }
}
