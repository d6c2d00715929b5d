//! Immutable, versioned cluster state.
//!
//! Every field sits behind an `Arc` so that an update which only touches
//! routing shares membership and metadata with the previous version.

use std::sync::Arc;

use ebb_core::{NodeId, ShardId, StateVersion};

use crate::error::ClusterResult;
use crate::metadata::{IndexMetadata, Metadata};
use crate::node::{DiscoveryNode, DiscoveryNodes};
use crate::routing_table::RoutingTable;
use crate::shutdown_metadata::ShutdownMetadata;

/// One published version of the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterState {
    version: StateVersion,
    nodes: Arc<DiscoveryNodes>,
    routing: Arc<RoutingTable>,
    metadata: Arc<Metadata>,
}

impl ClusterState {
    /// Creates a version-zero state.
    #[must_use]
    pub fn new(nodes: DiscoveryNodes, routing: RoutingTable, metadata: Metadata) -> Self {
        Self {
            version: StateVersion::new(0),
            nodes: Arc::new(nodes),
            routing: Arc::new(routing),
            metadata: Arc::new(metadata),
        }
    }

    /// Version of this state.
    #[must_use]
    pub const fn version(&self) -> StateVersion {
        self.version
    }

    /// Cluster membership.
    #[must_use]
    pub fn nodes(&self) -> &DiscoveryNodes {
        &self.nodes
    }

    /// Shard placement.
    #[must_use]
    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    /// Index settings and shutdown records.
    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Active shutdown records.
    #[must_use]
    pub fn shutdowns(&self) -> &ShutdownMetadata {
        &self.metadata.shutdowns
    }

    /// Returns a copy with membership replaced.
    #[must_use]
    pub fn with_nodes(&self, nodes: DiscoveryNodes) -> Self {
        Self {
            nodes: Arc::new(nodes),
            ..self.clone()
        }
    }

    /// Returns a copy with routing replaced.
    #[must_use]
    pub fn with_routing(&self, routing: RoutingTable) -> Self {
        Self {
            routing: Arc::new(routing),
            ..self.clone()
        }
    }

    /// Returns a copy with metadata replaced.
    #[must_use]
    pub fn with_metadata(&self, metadata: Metadata) -> Self {
        Self {
            metadata: Arc::new(metadata),
            ..self.clone()
        }
    }

    /// Returns a copy with the shutdown records replaced.
    #[must_use]
    pub fn with_shutdowns(&self, shutdowns: ShutdownMetadata) -> Self {
        self.with_metadata(self.metadata.with_shutdowns(shutdowns))
    }

    /// Returns true if `other` holds the same membership, routing and metadata.
    ///
    /// Parts shared with `other` compare by pointer; only rebuilt parts are
    /// compared by value. The version is ignored.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        fn same<T: PartialEq>(a: &Arc<T>, b: &Arc<T>) -> bool {
            Arc::ptr_eq(a, b) || a == b
        }
        same(&self.nodes, &other.nodes) && same(&self.routing, &other.routing) && same(&self.metadata, &other.metadata)
    }

    pub(crate) fn with_version(&self, version: StateVersion) -> Self {
        Self {
            version,
            ..self.clone()
        }
    }

    /// Returns a copy with routing changed by `update`.
    ///
    /// # Errors
    ///
    /// Returns the error from `update`; the original state is untouched.
    pub fn update_routing<F>(&self, update: F) -> ClusterResult<Self>
    where
        F: FnOnce(&mut RoutingTable) -> ClusterResult<()>,
    {
        let mut routing = RoutingTable::clone(&self.routing);
        update(&mut routing)?;
        Ok(self.with_routing(routing))
    }

    /// Returns a copy with `node` joined.
    ///
    /// # Errors
    ///
    /// Returns an error if the node id or name is already in use.
    pub fn with_node_joined(&self, node: DiscoveryNode) -> ClusterResult<Self> {
        Ok(self.with_nodes(self.nodes.with_node(node)?))
    }

    /// Returns a copy with `node_id` gone and its copies unwound.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is not a member.
    pub fn with_node_left(&self, node_id: &NodeId) -> ClusterResult<Self> {
        let nodes = self.nodes.without_node(node_id)?;
        let mut routing = RoutingTable::clone(&self.routing);
        routing.remove_node(node_id);
        Ok(Self {
            version: self.version,
            nodes: Arc::new(nodes),
            routing: Arc::new(routing),
            metadata: Arc::clone(&self.metadata),
        })
    }

    /// Returns a copy with `index` created and all its copies unassigned.
    ///
    /// # Errors
    ///
    /// Returns an error if the index already exists.
    pub fn with_index(&self, index: IndexMetadata) -> ClusterResult<Self> {
        let mut routing = RoutingTable::clone(&self.routing);
        for shard in 0..index.number_of_shards {
            let shard_id = ShardId::new(index.name.clone(), shard);
            routing.add_copy(shard_id.clone(), true);
            for _ in 0..index.number_of_replicas {
                routing.add_copy(shard_id.clone(), false);
            }
        }
        let metadata = self.metadata.with_index(index)?;
        Ok(Self {
            version: self.version,
            nodes: Arc::clone(&self.nodes),
            routing: Arc::new(routing),
            metadata: Arc::new(metadata),
        })
    }
}

/// Describes the transition from one published state to the next.
#[derive(Debug, Clone)]
pub struct ClusterChangedEvent {
    source: String,
    previous: Arc<ClusterState>,
    current: Arc<ClusterState>,
}

impl ClusterChangedEvent {
    /// Creates an event.
    #[must_use]
    pub fn new(source: impl Into<String>, previous: Arc<ClusterState>, current: Arc<ClusterState>) -> Self {
        Self {
            source: source.into(),
            previous,
            current,
        }
    }

    /// What triggered the update.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The state before the update.
    #[must_use]
    pub fn previous(&self) -> &Arc<ClusterState> {
        &self.previous
    }

    /// The newly published state.
    #[must_use]
    pub fn state(&self) -> &Arc<ClusterState> {
        &self.current
    }

    /// Nodes present now that were not present before.
    #[must_use]
    pub fn nodes_added(&self) -> Vec<&DiscoveryNode> {
        self.current
            .nodes()
            .iter()
            .filter(|n| !self.previous.nodes().contains(&n.id))
            .collect()
    }

    /// Nodes present before that are gone now.
    #[must_use]
    pub fn nodes_removed(&self) -> Vec<&DiscoveryNode> {
        self.previous
            .nodes()
            .iter()
            .filter(|n| !self.current.nodes().contains(&n.id))
            .collect()
    }

    /// Returns true if membership changed.
    #[must_use]
    pub fn nodes_changed(&self) -> bool {
        !Arc::ptr_eq(&self.previous.nodes, &self.current.nodes) && self.previous.nodes != self.current.nodes
    }

    /// Returns true if shard placement changed.
    #[must_use]
    pub fn routing_changed(&self) -> bool {
        !Arc::ptr_eq(&self.previous.routing, &self.current.routing) && self.previous.routing != self.current.routing
    }

    /// Returns true if any shutdown record was put or deleted.
    #[must_use]
    pub fn shutdowns_changed(&self) -> bool {
        self.previous.shutdowns() != self.current.shutdowns()
    }
}
