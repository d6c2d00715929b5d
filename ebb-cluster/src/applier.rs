//! Cluster state application.
//!
//! The applier owns the current state, runs listeners synchronously for every
//! accepted update and publishes the result through a watch channel. Readers
//! only ever see fully-formed states.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::cluster_state::{ClusterChangedEvent, ClusterState};

/// Reacts to accepted cluster-state updates.
///
/// Called on the applier's thread before the state is published, so
/// implementations must not block or perform I/O.
pub trait ClusterStateListener: Send + Sync {
    /// Handles one accepted update.
    fn cluster_changed(&self, event: &ClusterChangedEvent);
}

/// Applies candidate states one at a time.
pub struct ClusterApplier {
    /// Last accepted state.
    current: Arc<ClusterState>,
    /// Listeners, called in registration order.
    listeners: Vec<Arc<dyn ClusterStateListener>>,
    /// Publishes every accepted state.
    publisher: watch::Sender<Arc<ClusterState>>,
}

impl fmt::Debug for ClusterApplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterApplier")
            .field("version", &self.current.version())
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl ClusterApplier {
    /// Creates an applier seeded with `initial` and a receiver for published states.
    #[must_use]
    pub fn new(initial: ClusterState) -> (Self, watch::Receiver<Arc<ClusterState>>) {
        let current = Arc::new(initial);
        let (publisher, receiver) = watch::channel(Arc::clone(&current));
        (
            Self {
                current,
                listeners: Vec::new(),
                publisher,
            },
            receiver,
        )
    }

    /// The last accepted state.
    #[must_use]
    pub const fn state(&self) -> &Arc<ClusterState> {
        &self.current
    }

    /// Returns a new receiver of published states.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<ClusterState>> {
        self.publisher.subscribe()
    }

    /// Registers a listener and immediately replays the current state to it.
    pub fn add_listener(&mut self, listener: Arc<dyn ClusterStateListener>) {
        let event = ClusterChangedEvent::new(
            "listener-registered",
            Arc::clone(&self.current),
            Arc::clone(&self.current),
        );
        listener.cluster_changed(&event);
        self.listeners.push(listener);
    }

    /// Accepts `candidate` as the next state.
    ///
    /// A candidate identical to the current state is a no-op. Otherwise the
    /// version is bumped, listeners run, and the new state is published.
    pub fn apply(&mut self, source: &str, candidate: ClusterState) -> Arc<ClusterState> {
        let version = self.current.version();
        if self.current.same_content(&candidate) {
            debug!(source, version = %version, "cluster state unchanged");
            return Arc::clone(&self.current);
        }

        let next = Arc::new(candidate.with_version(version.next()));
        let event = ClusterChangedEvent::new(source, Arc::clone(&self.current), Arc::clone(&next));
        for listener in &self.listeners {
            listener.cluster_changed(&event);
        }

        self.current = Arc::clone(&next);
        self.publisher.send_replace(Arc::clone(&next));
        debug!(source, version = %next.version(), "applied cluster state");
        next
    }
}
