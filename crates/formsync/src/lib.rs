//! `formsync` - Offline-first disclaimer form client
//!
//! Submits disclaimer forms to a remote collection service. While the service
//! cannot be reached, submissions wait in a local SQLite queue and a background
//! sync is registered; once connectivity returns, the queue is drained one
//! record at a time, removing each only after the service accepted it.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod api;
pub mod cli;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod logging;
pub mod queue;
pub mod record;
pub mod scheduler;
pub mod storage;
pub mod sync;
pub mod trigger;

pub use api::{HttpSubmissionApi, SubmissionApi};
pub use client::{Listing, SubmissionClient, SubmitOutcome};
pub use config::Config;
pub use connectivity::{ConnectivityMonitor, ConnectivityState, ReachabilityProbe};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use queue::LocalQueue;
pub use record::{DeadLetter, Delivery, RemoteSubmission, Submission, SubmissionRecord};
pub use scheduler::SyncScheduler;
pub use storage::{Storage, StorageStats};
pub use sync::{SyncReport, SyncWorker};
pub use trigger::{BackgroundSync, StoredRegistrations, SyncTrigger, SYNC_FORM_TAG};
