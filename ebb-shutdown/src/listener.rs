//! Status publication.
//!
//! The lifecycle listener runs on the coordinator for every accepted cluster
//! state. It recomputes the status of every active record from that state and
//! replaces the published `StatusTable` wholesale.

use std::collections::BTreeMap;
use std::sync::Arc;

use ebb_cluster::{ClusterChangedEvent, ClusterState, ClusterStateListener};
use ebb_core::{NodeId, StateVersion};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::status::{MigrationStatus, ShardMigrationStatusComputer};

/// Migration status of every active record, as of one cluster state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusTable {
    /// Cluster state the statuses were computed from.
    pub version: StateVersion,
    /// Status per vacating node.
    pub statuses: BTreeMap<NodeId, MigrationStatus>,
}

impl StatusTable {
    /// Returns the status of `node_id`, if it has an active record.
    #[must_use]
    pub fn get(&self, node_id: &NodeId) -> Option<&MigrationStatus> {
        self.statuses.get(node_id)
    }
}

/// Recomputes and publishes shutdown statuses on every cluster change.
#[derive(Debug)]
pub struct ShutdownLifecycleListener {
    computer: ShardMigrationStatusComputer,
    publisher: watch::Sender<Arc<StatusTable>>,
}

impl ShutdownLifecycleListener {
    /// Creates a listener and a receiver for the tables it publishes.
    #[must_use]
    pub fn new(computer: ShardMigrationStatusComputer) -> (Self, watch::Receiver<Arc<StatusTable>>) {
        let (publisher, receiver) = watch::channel(Arc::new(StatusTable::default()));
        (Self { computer, publisher }, receiver)
    }

    /// Returns a new receiver of published tables.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<StatusTable>> {
        self.publisher.subscribe()
    }

    /// Computes the status of every active record in `state`.
    ///
    /// A record whose status cannot be computed is left out of the table; the
    /// next state supersedes the failure.
    #[must_use]
    pub fn recompute(&self, state: &ClusterState) -> StatusTable {
        let mut statuses = BTreeMap::new();
        for record in state.shutdowns().iter() {
            match self.computer.compute(record, state) {
                Ok(status) => {
                    statuses.insert(record.node_id().clone(), status);
                }
                Err(err) => {
                    warn!(
                        node_id = %record.node_id(),
                        version = %state.version(),
                        error = %err,
                        "failed to compute shutdown status"
                    );
                }
            }
        }
        debug!(
            version = %state.version(),
            records = state.shutdowns().len(),
            "recomputed shutdown statuses"
        );
        StatusTable {
            version: state.version(),
            statuses,
        }
    }
}

impl ClusterStateListener for ShutdownLifecycleListener {
    fn cluster_changed(&self, event: &ClusterChangedEvent) {
        let table = self.recompute(event.state());
        self.publisher.send_replace(Arc::new(table));
    }
}
