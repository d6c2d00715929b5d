//! Cluster error types.

use ebb_core::{AllocationId, IndexName, NodeId, NodeName};
use thiserror::Error;

use crate::shard_routing::ShardRoutingState;

/// Result type for cluster operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors that can occur while building or updating cluster state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClusterError {
    /// No shard copy with this allocation id exists.
    #[error("unknown shard copy: {allocation_id}")]
    UnknownAllocation {
        /// The allocation id that was not found.
        allocation_id: AllocationId,
    },

    /// A routing transition was attempted from the wrong state.
    #[error("cannot {operation} shard copy {allocation_id} in state {state}")]
    InvalidTransition {
        /// The shard copy.
        allocation_id: AllocationId,
        /// Its current state.
        state: ShardRoutingState,
        /// The attempted transition.
        operation: &'static str,
    },

    /// A relocation was requested onto the node that already holds the copy.
    #[error("shard copy {allocation_id} is already on node [{node_id}]")]
    SameNode {
        /// The shard copy.
        allocation_id: AllocationId,
        /// The node it is on.
        node_id: NodeId,
    },

    /// The node is not a member of the cluster.
    #[error("unknown node [{node_id}]")]
    UnknownNode {
        /// The node that was not found.
        node_id: NodeId,
    },

    /// A node with this id is already a member.
    #[error("node id [{node_id}] is already in use")]
    DuplicateNodeId {
        /// The duplicated id.
        node_id: NodeId,
    },

    /// A node with this name is already a member.
    #[error("node name [{name}] is already in use")]
    DuplicateNodeName {
        /// The duplicated name.
        name: NodeName,
    },

    /// The index does not exist.
    #[error("unknown index [{index}]")]
    UnknownIndex {
        /// The index that was not found.
        index: IndexName,
    },

    /// The index already exists.
    #[error("index [{index}] already exists")]
    DuplicateIndex {
        /// The duplicated index.
        index: IndexName,
    },

    /// The coordinator task has stopped.
    #[error("cluster coordinator has shut down")]
    CoordinatorShutdown,
}
