//! Background sync requests.
//!
//! Queued submissions ask the host's background task facility to run a sync
//! later under a tag. The facility persists the request so it survives the
//! requesting process; the scheduler picks it up once connectivity allows.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::queue::LocalQueue;

/// Tag under which queued submissions request delivery.
pub const SYNC_FORM_TAG: &str = "sync-form";

/// A host facility that runs tagged work later, possibly in another process.
#[async_trait]
pub trait BackgroundSync: Send + Sync + Debug {
    /// Record a request to run the work named `tag`.
    ///
    /// Registering a tag that is already pending coalesces into one request.
    async fn register(&self, tag: &str) -> Result<()>;

    /// Put `tag` back after its work could not finish.
    ///
    /// Unlike [`register`](Self::register) this does not wake the host; the
    /// request waits for the next poll or connectivity change.
    async fn defer(&self, tag: &str) -> Result<()>;

    /// Claim every pending request.
    async fn take_registrations(&self) -> Result<Vec<String>>;

    /// Resolve when a registration may have been made in this process.
    async fn registered(&self);
}

/// [`BackgroundSync`] backed by the queue store's registration table.
#[derive(Debug, Clone)]
pub struct StoredRegistrations {
    queue: LocalQueue,
    notify: Arc<Notify>,
}

impl StoredRegistrations {
    /// Persist registrations next to the records they deliver.
    #[must_use]
    pub fn new(queue: LocalQueue) -> Self {
        Self {
            queue,
            notify: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl BackgroundSync for StoredRegistrations {
    async fn register(&self, tag: &str) -> Result<()> {
        let fresh = self.queue.register_sync(tag.to_string()).await?;
        if !fresh {
            debug!("Sync tag '{}' already registered", tag);
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn defer(&self, tag: &str) -> Result<()> {
        self.queue.register_sync(tag.to_string()).await?;
        debug!("Sync tag '{}' deferred", tag);
        Ok(())
    }

    async fn take_registrations(&self) -> Result<Vec<String>> {
        self.queue.take_registrations().await
    }

    async fn registered(&self) {
        self.notify.notified().await;
    }
}

/// Client-side entry point for requesting a deferred sync.
#[derive(Debug, Clone, Default)]
pub struct SyncTrigger {
    facility: Option<Arc<dyn BackgroundSync>>,
}

impl SyncTrigger {
    /// Trigger backed by `facility`.
    #[must_use]
    pub fn new(facility: Arc<dyn BackgroundSync>) -> Self {
        Self {
            facility: Some(facility),
        }
    }

    /// Trigger for hosts without a background task facility.
    #[must_use]
    pub fn unavailable() -> Self {
        Self { facility: None }
    }

    /// Ask for a sync under `tag`.
    ///
    /// Never fails: an unavailable facility or a refused registration is
    /// logged and reported as `false`. Queued records stay queued and are
    /// delivered by the foreground fallback instead.
    pub async fn request_sync(&self, tag: &str) -> bool {
        let Some(facility) = &self.facility else {
            debug!("No background sync facility; '{}' not registered", tag);
            return false;
        };

        match facility.register(tag).await {
            Ok(()) => {
                info!("Background sync registered: {}", tag);
                true
            }
            Err(e) => {
                warn!("Background sync registration for '{}' failed: {}", tag, e);
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;
    use crate::error::Error;

    /// Facility that refuses every registration.
    #[derive(Debug, Default)]
    pub struct RefusingFacility {
        attempts: Mutex<usize>,
    }

    impl RefusingFacility {
        pub fn attempts(&self) -> usize {
            *self.attempts.lock().unwrap()
        }
    }

    #[async_trait]
    impl BackgroundSync for RefusingFacility {
        async fn register(&self, tag: &str) -> Result<()> {
            *self.attempts.lock().unwrap() += 1;
            Err(Error::background_task(tag, "permission denied"))
        }

        async fn defer(&self, tag: &str) -> Result<()> {
            Err(Error::background_task(tag, "permission denied"))
        }

        async fn take_registrations(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn registered(&self) {
            std::future::pending::<()>().await;
        }
    }
}
