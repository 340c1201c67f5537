//! Dispatching background sync registrations.
//!
//! The scheduler is the host side of [`BackgroundSync`]: it waits for
//! registrations (made in this process or persisted by another one) and for
//! connectivity to return, then hands the known tag to the [`SyncWorker`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::connectivity::ConnectivityMonitor;
use crate::error::Result;
use crate::sync::{SyncReport, SyncWorker};
use crate::trigger::BackgroundSync;

/// Runs sync passes when registrations are due.
#[derive(Debug, Clone)]
pub struct SyncScheduler {
    facility: Arc<dyn BackgroundSync>,
    worker: SyncWorker,
    monitor: ConnectivityMonitor,
    tag: String,
    sync_on_reconnect: bool,
    poll_interval: Duration,
}

impl SyncScheduler {
    /// Create a scheduler dispatching `tag` to `worker`.
    #[must_use]
    pub fn new(
        facility: Arc<dyn BackgroundSync>,
        worker: SyncWorker,
        monitor: ConnectivityMonitor,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            facility,
            worker,
            monitor,
            tag: tag.into(),
            sync_on_reconnect: true,
            poll_interval: Duration::from_secs(10),
        }
    }

    /// Whether to sync a non-empty queue on every offline to online transition.
    #[must_use]
    pub fn with_sync_on_reconnect(mut self, enabled: bool) -> Self {
        self.sync_on_reconnect = enabled;
        self
    }

    /// How often to look for registrations persisted by other processes.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Dispatch due registrations until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut connectivity = self.monitor.subscribe();
        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("Sync scheduler started for tag '{}'", self.tag);

        loop {
            tokio::select! {
                () = self.facility.registered() => {
                    self.log_failure(self.dispatch().await);
                }
                _ = poll.tick() => {
                    self.log_failure(self.dispatch().await);
                }
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = connectivity.borrow_and_update().is_online();
                    if online {
                        self.log_failure(self.on_reconnect().await);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Sync scheduler stopped");
    }

    /// Run the work for every pending registration, if online.
    ///
    /// Registrations stay pending while offline. A tag whose pass errors, is
    /// skipped, or cannot reach the endpoint is deferred for a later dispatch;
    /// unknown tags are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the registrations cannot be read.
    pub async fn dispatch(&self) -> Result<Option<SyncReport>> {
        if !self.monitor.is_online() {
            debug!("Offline, leaving sync registrations pending");
            return Ok(None);
        }

        let mut report = None;
        for tag in self.facility.take_registrations().await? {
            if tag != self.tag {
                warn!("Dropping registration for unknown sync tag '{}'", tag);
                continue;
            }
            match self.worker.run_pass().await {
                Ok(pass) => {
                    if pass.needs_retry() {
                        debug!("Sync pass for '{}' unfinished, deferring", tag);
                        self.defer(&tag).await;
                    }
                    report = Some(pass);
                }
                Err(e) => {
                    warn!("Sync pass for '{}' failed: {}", tag, e);
                    self.defer(&tag).await;
                }
            }
        }
        Ok(report)
    }

    /// Handle an offline to online transition.
    async fn on_reconnect(&self) -> Result<Option<SyncReport>> {
        if let Some(report) = self.dispatch().await? {
            return Ok(Some(report));
        }
        if !self.sync_on_reconnect || self.worker.queue().is_empty().await? {
            return Ok(None);
        }
        info!("Connectivity restored with pending submissions, syncing");
        self.worker.run_pass().await.map(Some)
    }

    async fn defer(&self, tag: &str) {
        if let Err(e) = self.facility.defer(tag).await {
            warn!("Could not re-register '{}': {}", tag, e);
        }
    }

    fn log_failure(&self, outcome: Result<Option<SyncReport>>) {
        if let Err(e) = outcome {
            warn!("Sync scheduling for '{}' failed: {}", self.tag, e);
        }
    }
}
