//! Connectivity monitoring.
//!
//! [`ConnectivityMonitor`] is the one place that knows whether the process is
//! online. It is purely event-driven: whoever observes the network (the
//! [`ReachabilityProbe`] in the CLI, a test, or an embedding application)
//! reports transitions through [`ConnectivityMonitor::set_state`], and every
//! subscriber sees the same transition.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Whether the network is reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityState {
    /// The remote endpoint is believed reachable.
    Online,
    /// No network.
    Offline,
}

impl ConnectivityState {
    /// Map a reachability flag onto a state.
    #[must_use]
    pub fn from_online(online: bool) -> Self {
        if online {
            Self::Online
        } else {
            Self::Offline
        }
    }

    /// Whether this is [`ConnectivityState::Online`].
    #[must_use]
    pub fn is_online(self) -> bool {
        self == Self::Online
    }
}

impl std::fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Receiver side of the monitor; `changed().await` wakes on each transition.
pub type ConnectivityWatch = watch::Receiver<ConnectivityState>;

static GLOBAL: OnceLock<ConnectivityMonitor> = OnceLock::new();

/// Process-wide observable connectivity state.
///
/// Clones share the same state.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<ConnectivityState>>,
}

impl ConnectivityMonitor {
    /// Create an independent monitor.
    ///
    /// Applications should use [`ConnectivityMonitor::global`]; separate
    /// instances are for tests and embedding.
    #[must_use]
    pub fn new(initial: ConnectivityState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// The process-wide monitor. Starts `Online` until told otherwise.
    #[must_use]
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(|| Self::new(ConnectivityState::Online))
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectivityState {
        *self.tx.borrow()
    }

    /// Whether the current state is online.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.state().is_online()
    }

    /// Apply a network status notification.
    ///
    /// Subscribers are only woken when the state actually changes. Returns
    /// whether it did.
    pub fn set_state(&self, state: ConnectivityState) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            match state {
                ConnectivityState::Online => info!("Connectivity: online"),
                ConnectivityState::Offline => warn!("Connectivity: offline"),
            }
        }
        changed
    }

    /// Shorthand for [`ConnectivityMonitor::set_state`].
    pub fn set_online(&self, online: bool) -> bool {
        self.set_state(ConnectivityState::from_online(online))
    }

    /// Observe transitions from now on.
    #[must_use]
    pub fn subscribe(&self) -> ConnectivityWatch {
        self.tx.subscribe()
    }

    /// Suspend until the state is online.
    pub async fn wait_until_online(&self) {
        let mut rx = self.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|state| state.is_online()).await;
    }
}

/// Host-side reachability check feeding the monitor.
///
/// A TCP connect to the remote endpoint's host stands in for the browser's
/// network status notifications.
#[derive(Debug, Clone)]
pub struct ReachabilityProbe {
    host: String,
    port: u16,
    timeout: Duration,
}

impl ReachabilityProbe {
    /// Build a probe for the host and port of `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBaseUrl`] if the URL has no host or port.
    pub fn for_base_url(base_url: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(base_url).map_err(|e| Error::InvalidBaseUrl {
            url: base_url.to_string(),
            message: e.to_string(),
        })?;
        let host = url.host_str().ok_or_else(|| Error::InvalidBaseUrl {
            url: base_url.to_string(),
            message: "missing host".to_string(),
        })?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::InvalidBaseUrl {
                url: base_url.to_string(),
                message: "missing port".to_string(),
            })?;
        Ok(Self {
            host: host.to_string(),
            port,
            timeout,
        })
    }

    /// The probed `host:port`.
    #[must_use]
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Try one connection.
    pub async fn check(&self) -> ConnectivityState {
        let target = self.target();
        match tokio::time::timeout(self.timeout, TcpStream::connect(&target)).await {
            Ok(Ok(_)) => ConnectivityState::Online,
            Ok(Err(e)) => {
                debug!("Reachability probe to {} failed: {}", target, e);
                ConnectivityState::Offline
            }
            Err(_) => {
                debug!("Reachability probe to {} timed out", target);
                ConnectivityState::Offline
            }
        }
    }

    /// Probe once and publish the result.
    pub async fn refresh(&self, monitor: &ConnectivityMonitor) -> ConnectivityState {
        let state = self.check().await;
        monitor.set_state(state);
        state
    }

    /// Re-probe every `interval` until `shutdown` flips to `true`.
    pub async fn run(
        &self,
        monitor: ConnectivityMonitor,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refresh(&monitor).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("Reachability probe stopping");
                        return;
                    }
                }
            }
        }
    }
}
