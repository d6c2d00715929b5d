//! Cluster coordinator actor.
//!
//! The coordinator is the single writer of cluster state. Update tasks are
//! sent over a command channel and run one at a time against the latest
//! state, so concurrent writers are linearized.
//!
//! # Design
//!
//! ```text
//! ShutdownService ──┐
//!                   │     ┌──────────────────┐
//! Node membership ──┼────►│ ClusterCoordinator│────► ClusterApplier ──► watch
//!                   │     └──────────────────┘         (listeners)
//! Allocator       ──┘
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use ebb_core::Limits;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::applier::{ClusterApplier, ClusterStateListener};
use crate::cluster_state::ClusterState;
use crate::error::{ClusterError, ClusterResult};

/// Work run by the coordinator against its applier.
type UpdateJob = Box<dyn FnOnce(&mut ClusterApplier) + Send>;

/// Commands that can be sent to the coordinator.
pub(crate) enum ClusterCommand {
    /// Run an update task.
    Update {
        /// What triggered the update.
        source: String,
        /// The task; it replies on its own channel.
        job: UpdateJob,
    },
    /// Register a listener.
    AddListener {
        /// The listener.
        listener: Arc<dyn ClusterStateListener>,
        /// Acknowledges registration.
        reply: oneshot::Sender<()>,
    },
    /// Shutdown the coordinator.
    Shutdown,
}

impl fmt::Debug for ClusterCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Update { source, .. } => f.debug_struct("Update").field("source", source).finish_non_exhaustive(),
            Self::AddListener { .. } => f.debug_struct("AddListener").finish_non_exhaustive(),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// Source of immutable routing snapshots.
#[async_trait]
pub trait RoutingSnapshotSource: Send + Sync {
    /// Returns the latest published state.
    fn current(&self) -> Arc<ClusterState>;

    /// Registers `listener` for every accepted update.
    ///
    /// The listener is immediately called once with the current state.
    ///
    /// # Errors
    ///
    /// Returns an error if the source has shut down.
    async fn on_change(&self, listener: Arc<dyn ClusterStateListener>) -> ClusterResult<()>;
}

/// Handle for sending commands to the coordinator.
#[derive(Debug, Clone)]
pub struct ClusterHandle {
    tx: mpsc::Sender<ClusterCommand>,
    state_rx: watch::Receiver<Arc<ClusterState>>,
}

impl ClusterHandle {
    /// Runs `task` against the latest state and applies the state it returns.
    ///
    /// The task's error rejects the update without touching the state.
    ///
    /// # Errors
    ///
    /// Returns the task's error, or `ClusterError::CoordinatorShutdown` converted into `E`.
    pub async fn submit_update<T, E, F>(&self, source: impl Into<String>, task: F) -> Result<T, E>
    where
        F: FnOnce(&ClusterState) -> Result<(ClusterState, T), E> + Send + 'static,
        T: Send + 'static,
        E: From<ClusterError> + fmt::Display + Send + 'static,
    {
        let source = source.into();
        let job_source = source.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let job: UpdateJob = Box::new(move |applier| {
            let result = task(applier.state()).map(|(next, value)| {
                applier.apply(&job_source, next);
                value
            });
            if let Err(err) = &result {
                warn!(source = %job_source, error = %err, "cluster state update rejected");
            }
            let _ = reply_tx.send(result);
        });

        self.tx
            .send(ClusterCommand::Update { source, job })
            .await
            .map_err(|_| E::from(ClusterError::CoordinatorShutdown))?;

        reply_rx
            .await
            .map_err(|_| E::from(ClusterError::CoordinatorShutdown))?
    }

    /// Applies the state returned by `task`.
    ///
    /// # Errors
    ///
    /// Returns the task's error or `ClusterError::CoordinatorShutdown`.
    pub async fn update<F>(&self, source: impl Into<String>, task: F) -> ClusterResult<()>
    where
        F: FnOnce(&ClusterState) -> ClusterResult<ClusterState> + Send + 'static,
    {
        self.submit_update(source, move |state| task(state).map(|next| (next, ())))
            .await
    }

    /// Returns a receiver of published states.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<ClusterState>> {
        self.state_rx.clone()
    }

    /// Requests the coordinator to shut down.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(ClusterCommand::Shutdown).await;
    }
}

#[async_trait]
impl RoutingSnapshotSource for ClusterHandle {
    fn current(&self) -> Arc<ClusterState> {
        Arc::clone(&self.state_rx.borrow())
    }

    async fn on_change(&self, listener: Arc<dyn ClusterStateListener>) -> ClusterResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ClusterCommand::AddListener {
                listener,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ClusterError::CoordinatorShutdown)?;
        reply_rx.await.map_err(|_| ClusterError::CoordinatorShutdown)
    }
}

/// The single writer of cluster state.
struct ClusterCoordinator {
    /// Command receiver.
    cmd_rx: mpsc::Receiver<ClusterCommand>,
    /// Owns the current state.
    applier: ClusterApplier,
}

impl ClusterCoordinator {
    /// Runs the coordinator message loop.
    async fn run(mut self) {
        debug!(version = %self.applier.state().version(), "ClusterCoordinator started");

        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                ClusterCommand::Update { source, job } => {
                    debug!(source = %source, "running cluster state update");
                    job(&mut self.applier);
                }
                ClusterCommand::AddListener { listener, reply } => {
                    self.applier.add_listener(listener);
                    let _ = reply.send(());
                }
                ClusterCommand::Shutdown => {
                    debug!("ClusterCoordinator shutting down");
                    break;
                }
            }
        }

        debug!("ClusterCoordinator stopped");
    }
}

/// Spawns the coordinator seeded with `initial` and returns a handle to it.
///
/// Must be called from within a tokio runtime.
#[must_use]
pub fn spawn_cluster_coordinator(initial: ClusterState, limits: &Limits) -> ClusterHandle {
    let capacity = usize::try_from(limits.coordinator_channel_capacity)
        .unwrap_or(usize::MAX)
        .max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let (applier, state_rx) = ClusterApplier::new(initial);

    let coordinator = ClusterCoordinator { cmd_rx: rx, applier };
    tokio::spawn(coordinator.run());

    ClusterHandle { tx, state_rx }
}
