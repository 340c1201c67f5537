//! The submission client.
//!
//! [`SubmissionClient`] is what the user interface talks to. Submitting while
//! online goes straight to the endpoint; offline, or when the network drops
//! mid-request, the submission is queued and a background sync is requested.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::api::SubmissionApi;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{Error, Result};
use crate::queue::LocalQueue;
use crate::record::{Delivery, RemoteSubmission, Submission, SubmissionRecord};
use crate::sync::{SyncReport, SyncWorker};
use crate::trigger::{SyncTrigger, SYNC_FORM_TAG};

/// What happened to a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// The endpoint accepted it.
    Delivered(Delivery),
    /// It was saved locally and will be delivered later.
    Queued {
        /// Local key of the queued record.
        key: i64,
        /// Whether a background sync was registered for it.
        sync_registered: bool,
    },
    /// The endpoint answered but declined it.
    Rejected {
        /// Error detail from the endpoint.
        reason: String,
    },
    /// It was neither delivered nor saved.
    Failed {
        /// What went wrong.
        reason: String,
    },
}

impl SubmitOutcome {
    /// Status line shown to the user.
    #[must_use]
    pub fn message(&self) -> &'static str {
        match self {
            Self::Delivered(_) => "Form submitted successfully!",
            Self::Queued { .. } => "Saved offline, pending sync.",
            Self::Rejected { .. } => "Failed to submit form.",
            Self::Failed { .. } => "Error connecting to server.",
        }
    }

    /// Whether the form inputs should be cleared.
    #[must_use]
    pub fn clears_form(&self) -> bool {
        matches!(self, Self::Delivered(_) | Self::Queued { .. })
    }
}

/// Submissions as shown in the listing view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", content = "submissions", rename_all = "snake_case")]
pub enum Listing {
    /// Fetched from the endpoint.
    Remote(Vec<RemoteSubmission>),
    /// Read from the local queue because the endpoint was unreachable.
    Local(Vec<SubmissionRecord>),
}

impl Listing {
    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Remote(items) => items.len(),
            Self::Local(items) => items.len(),
        }
    }

    /// Whether there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Submits forms, queueing them when the endpoint cannot be reached.
#[derive(Debug, Clone)]
pub struct SubmissionClient {
    api: Arc<dyn SubmissionApi>,
    queue: Option<LocalQueue>,
    worker: Option<SyncWorker>,
    monitor: ConnectivityMonitor,
    trigger: SyncTrigger,
    tag: String,
}

impl SubmissionClient {
    /// Create a client.
    ///
    /// `queue` is `None` when the local store could not be opened; the client
    /// then works online only.
    #[must_use]
    pub fn new(
        api: Arc<dyn SubmissionApi>,
        queue: Option<LocalQueue>,
        monitor: ConnectivityMonitor,
        trigger: SyncTrigger,
        max_attempts: u32,
    ) -> Self {
        let worker = queue
            .clone()
            .map(|q| SyncWorker::new(q, Arc::clone(&api), max_attempts));
        Self {
            api,
            queue,
            worker,
            monitor,
            trigger,
            tag: SYNC_FORM_TAG.to_string(),
        }
    }

    /// Register background syncs under `tag` instead of the default.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// The sync worker, when offline storage is available.
    #[must_use]
    pub fn worker(&self) -> Option<&SyncWorker> {
        self.worker.as_ref()
    }

    /// Whether offline storage is available.
    #[must_use]
    pub fn has_offline_storage(&self) -> bool {
        self.queue.is_some()
    }

    fn queue(&self) -> Result<&LocalQueue> {
        self.queue.as_ref().ok_or(Error::OfflineStorageDisabled)
    }

    /// Submit a form.
    ///
    /// Validation failures are reported as [`SubmitOutcome::Rejected`] without
    /// contacting the endpoint.
    pub async fn submit(&self, submission: Submission) -> SubmitOutcome {
        if let Err(e) = submission.validate() {
            return SubmitOutcome::Rejected {
                reason: e.to_string(),
            };
        }

        let record = SubmissionRecord::new(submission);

        if !self.monitor.is_online() {
            debug!("Offline, queueing submission");
            return self.enqueue(record).await;
        }

        match self
            .api
            .create(&record.submission, Some(&record.idempotency_key))
            .await
        {
            Ok(delivery) => {
                info!("Submission delivered (remote id {:?})", delivery.remote_id);
                SubmitOutcome::Delivered(delivery)
            }
            Err(e) if e.is_network_failure() => {
                warn!("Endpoint unreachable, queueing submission: {}", e);
                self.enqueue(record).await
            }
            Err(e) => {
                warn!("Submission rejected: {}", e);
                SubmitOutcome::Rejected {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn enqueue(&self, record: SubmissionRecord) -> SubmitOutcome {
        let queue = match self.queue() {
            Ok(queue) => queue,
            Err(e) => {
                warn!("Cannot queue submission: {}", e);
                return SubmitOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        match queue.enqueue(record).await {
            Ok(key) => {
                let sync_registered = self.trigger.request_sync(&self.tag).await;
                info!("Submission queued as record {}", key);
                SubmitOutcome::Queued {
                    key,
                    sync_registered,
                }
            }
            Err(e) => {
                warn!("Failed to queue submission: {}", e);
                SubmitOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Foreground fallback: sync now if online and anything is queued.
    ///
    /// Returns `None` when there was nothing to do.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue store fails.
    pub async fn on_foreground(&self) -> Result<Option<SyncReport>> {
        let Some(worker) = &self.worker else {
            return Ok(None);
        };
        if !self.monitor.is_online() || worker.queue().is_empty().await? {
            return Ok(None);
        }
        worker.run_pass().await.map(Some)
    }

    /// Run a sync pass regardless of the queue's contents.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OfflineStorageDisabled`] without a local store, or an
    /// error if the store fails.
    pub async fn sync_now(&self) -> Result<SyncReport> {
        let worker = self.worker.as_ref().ok_or(Error::OfflineStorageDisabled)?;
        worker.run_pass().await
    }

    /// Submissions for the listing view.
    ///
    /// Falls back to the local queue when offline or when the endpoint
    /// cannot be reached.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint rejects the listing, or if the local
    /// fallback fails.
    pub async fn list_submissions(&self) -> Result<Listing> {
        if self.monitor.is_online() {
            match self.api.list().await {
                Ok(items) => return Ok(Listing::Remote(items)),
                Err(e) if e.is_network_failure() => {
                    warn!("Endpoint unreachable, showing local queue: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
        let local = match &self.queue {
            Some(queue) => queue.list_all().await?,
            None => Vec::new(),
        };
        Ok(Listing::Local(local))
    }

    /// Locally queued submissions.
    ///
    /// # Errors
    ///
    /// Returns an error if no local store is available or it fails.
    pub async fn pending(&self) -> Result<Vec<SubmissionRecord>> {
        self.queue()?.list_all().await
    }

    /// Replace the fields of a still-pending record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RecordNotFound`] if the record was already delivered
    /// or removed, or [`Error::InvalidSubmission`] for invalid fields.
    pub async fn edit_pending(&self, key: i64, submission: Submission) -> Result<()> {
        submission.validate()?;
        if !self.queue()?.update_pending(key, submission).await? {
            return Err(Error::RecordNotFound { key });
        }
        info!("Pending record {} updated", key);
        Ok(())
    }

    /// Drop a pending record without delivering it.
    ///
    /// # Errors
    ///
    /// Returns an error if no local store is available or it fails.
    pub async fn remove_pending(&self, key: i64) -> Result<()> {
        self.queue()?.remove(key).await
    }

    /// Update a submission the endpoint already holds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSubmission`] for invalid fields, or the
    /// endpoint's error.
    pub async fn update_remote(&self, id: i64, submission: Submission) -> Result<RemoteSubmission> {
        submission.validate()?;
        let updated = self.api.update(id, &submission).await?;
        info!("Remote submission {} updated", id);
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::api::testing::FakeApi;
    use crate::connectivity::ConnectivityState;
    use crate::trigger::{BackgroundSync, StoredRegistrations};

    fn sample(name: &str) -> Submission {
        Submission::new(name, "a@x.com", "123", "cot")
            .with_date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
    }

    struct Harness {
        api: Arc<FakeApi>,
        queue: LocalQueue,
        facility: Arc<StoredRegistrations>,
        monitor: ConnectivityMonitor,
        client: SubmissionClient,
    }

    fn harness(state: ConnectivityState) -> Harness {
        let api = Arc::new(FakeApi::new());
        let queue = LocalQueue::in_memory().unwrap();
        let facility = Arc::new(StoredRegistrations::new(queue.clone()));
        let monitor = ConnectivityMonitor::new(state);
        let client = SubmissionClient::new(
            api.clone(),
            Some(queue.clone()),
            monitor.clone(),
            SyncTrigger::new(facility.clone()),
            10,
        );
        Harness {
            api,
            queue,
            facility,
            monitor,
            client,
        }
    }

    #[tokio::test]
    async fn test_online_submit_is_delivered_directly() {
        let h = harness(ConnectivityState::Online);

        let outcome = h.client.submit(sample("A")).await;

        assert!(matches!(outcome, SubmitOutcome::Delivered(_)));
        assert_eq!(outcome.message(), "Form submitted successfully!");
        assert!(outcome.clears_form());
        assert!(h.queue.is_empty().await.unwrap());
        assert_eq!(h.api.stored().len(), 1);
    }

    #[tokio::test]
    async fn test_offline_submit_is_queued_without_network() {
        let h = harness(ConnectivityState::Offline);

        let outcome = h.client.submit(sample("A")).await;

        assert!(matches!(
            outcome,
            SubmitOutcome::Queued {
                sync_registered: true,
                ..
            }
        ));
        assert_eq!(outcome.message(), "Saved offline, pending sync.");
        assert!(outcome.clears_form());
        assert!(h.api.create_calls().is_empty());
        assert_eq!(h.queue.count().await.unwrap(), 1);
        assert_eq!(
            h.facility.take_registrations().await.unwrap(),
            vec![SYNC_FORM_TAG.to_string()]
        );
    }

    #[tokio::test]
    async fn test_network_failure_while_online_falls_back_to_queue() {
        let h = harness(ConnectivityState::Online);
        h.api.set_unreachable(true);

        let outcome = h.client.submit(sample("A")).await;

        assert!(matches!(outcome, SubmitOutcome::Queued { .. }));
        assert_eq!(h.queue.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rejection_is_not_queued() {
        let h = harness(ConnectivityState::Online);
        h.api.reject_name("A");

        let outcome = h.client.submit(sample("A")).await;

        assert!(matches!(outcome, SubmitOutcome::Rejected { .. }));
        assert_eq!(outcome.message(), "Failed to submit form.");
        assert!(!outcome.clears_form());
        assert!(h.queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_submission_never_leaves_the_client() {
        let h = harness(ConnectivityState::Online);

        let outcome = h.client.submit(Submission::new("", "", "", "")).await;

        match outcome {
            SubmitOutcome::Rejected { reason } => assert!(reason.contains("name is required")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(h.api.create_calls().is_empty());
    }

    #[tokio::test]
    async fn test_offline_without_storage_fails() {
        let api = Arc::new(FakeApi::new());
        let client = SubmissionClient::new(
            api.clone(),
            None,
            ConnectivityMonitor::new(ConnectivityState::Offline),
            SyncTrigger::unavailable(),
            10,
        );

        let outcome = client.submit(sample("A")).await;

        assert!(matches!(outcome, SubmitOutcome::Failed { .. }));
        assert_eq!(outcome.message(), "Error connecting to server.");
        assert!(!client.has_offline_storage());
    }

    #[tokio::test]
    async fn test_online_without_storage_still_delivers() {
        let api = Arc::new(FakeApi::new());
        let client = SubmissionClient::new(
            api.clone(),
            None,
            ConnectivityMonitor::new(ConnectivityState::Online),
            SyncTrigger::unavailable(),
            10,
        );

        let outcome = client.submit(sample("A")).await;
        assert!(matches!(outcome, SubmitOutcome::Delivered(_)));
        assert!(client.on_foreground().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_queued_without_facility_is_delivered_on_foreground() {
        let api = Arc::new(FakeApi::new());
        let queue = LocalQueue::in_memory().unwrap();
        let monitor = ConnectivityMonitor::new(ConnectivityState::Offline);
        let client = SubmissionClient::new(
            api.clone(),
            Some(queue.clone()),
            monitor.clone(),
            SyncTrigger::unavailable(),
            10,
        );

        let outcome = client.submit(sample("A")).await;
        assert!(matches!(
            outcome,
            SubmitOutcome::Queued {
                sync_registered: false,
                ..
            }
        ));

        assert!(client.on_foreground().await.unwrap().is_none());

        monitor.set_online(true);
        let report = client.on_foreground().await.unwrap().unwrap();
        assert_eq!(report.synced, 1);
        assert!(queue.is_empty().await.unwrap());
        assert!(api.stored()[0].matches(&sample("A")));
    }

    #[tokio::test]
    async fn test_offline_then_online_delivers_in_any_order() {
        let h = harness(ConnectivityState::Offline);
        for name in ["A", "B"] {
            h.client.submit(sample(name)).await;
        }

        h.monitor.set_online(true);
        h.client.sync_now().await.unwrap();

        let stored = h.api.stored();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().any(|s| s.matches(&sample("A"))));
        assert!(stored.iter().any(|s| s.matches(&sample("B"))));
        assert!(h.queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_listing_prefers_remote() {
        let h = harness(ConnectivityState::Online);
        h.client.submit(sample("A")).await;

        let listing = h.client.list_submissions().await.unwrap();
        assert!(matches!(listing, Listing::Remote(ref items) if items.len() == 1));
    }

    #[tokio::test]
    async fn test_listing_falls_back_to_local_queue() {
        let h = harness(ConnectivityState::Offline);
        h.client.submit(sample("A")).await;

        let listing = h.client.list_submissions().await.unwrap();
        assert!(matches!(listing, Listing::Local(ref items) if items.len() == 1));
        assert_eq!(h.api.list_calls(), 0);

        h.monitor.set_online(true);
        h.api.set_unreachable(true);
        let listing = h.client.list_submissions().await.unwrap();
        assert!(matches!(listing, Listing::Local(_)));
        assert_eq!(h.api.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_edit_pending_replaces_fields() {
        let h = harness(ConnectivityState::Offline);
        let SubmitOutcome::Queued { key, .. } = h.client.submit(sample("A")).await else {
            panic!("expected queued");
        };

        h.client.edit_pending(key, sample("A2")).await.unwrap();

        let pending = h.client.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key, Some(key));
        assert_eq!(pending[0].submission.name, "A2");
    }

    #[tokio::test]
    async fn test_edit_delivered_record_is_refused() {
        let h = harness(ConnectivityState::Offline);
        let SubmitOutcome::Queued { key, .. } = h.client.submit(sample("A")).await else {
            panic!("expected queued");
        };
        h.monitor.set_online(true);
        h.client.sync_now().await.unwrap();

        let err = h.client.edit_pending(key, sample("A2")).await.unwrap_err();
        assert!(matches!(err, Error::RecordNotFound { .. }));
        assert!(h.queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_edit_after_remove_does_not_resurrect() {
        let h = harness(ConnectivityState::Offline);
        let SubmitOutcome::Queued { key, .. } = h.client.submit(sample("A")).await else {
            panic!("expected queued");
        };
        // The sync worker deletes the record between the user opening the
        // edit and saving it.
        h.queue.remove(key).await.unwrap();

        let err = h.client.edit_pending(key, sample("A2")).await.unwrap_err();
        assert!(matches!(err, Error::RecordNotFound { key: k } if k == key));
        assert_eq!(h.queue.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_remote() {
        let h = harness(ConnectivityState::Online);
        let SubmitOutcome::Delivered(delivery) = h.client.submit(sample("A")).await else {
            panic!("expected delivered");
        };
        let id = delivery.remote_id.unwrap();

        let updated = h.client.update_remote(id, sample("A2")).await.unwrap();
        assert_eq!(updated.name, "A2");
        assert!(h.api.stored()[0].matches(&sample("A2")));
    }

    #[tokio::test]
    async fn test_remove_pending() {
        let h = harness(ConnectivityState::Offline);
        h.client.submit(sample("A")).await;
        let key = h.queue.list_all().await.unwrap()[0].key.unwrap();

        h.client.remove_pending(key).await.unwrap();
        assert!(h.queue.is_empty().await.unwrap());
    }

    #[test]
    fn test_outcome_serializes_with_tag() {
        let outcome = SubmitOutcome::Queued {
            key: 3,
            sync_registered: true,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "queued");
        assert_eq!(json["key"], 3);
    }
}
