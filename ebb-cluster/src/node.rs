//! Cluster membership.
//!
//! `DiscoveryNodes` is the membership view carried by every cluster state.
//! It is immutable once published; joins and leaves produce a new value.

use std::collections::{BTreeMap, BTreeSet};

use ebb_core::{NodeId, NodeName};
use serde::{Deserialize, Serialize};

use crate::error::{ClusterError, ClusterResult};

/// Role a node plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Eligible to be elected as the coordinating leader.
    Master,
    /// Holds shard data.
    Data,
}

/// A member of the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryNode {
    /// Ephemeral node id.
    pub id: NodeId,
    /// Operator-assigned node name.
    pub name: NodeName,
    /// Roles held by this node.
    pub roles: BTreeSet<NodeRole>,
}

impl DiscoveryNode {
    /// Creates a node with the given roles.
    #[must_use]
    pub fn new(
        id: impl Into<NodeId>,
        name: impl Into<NodeName>,
        roles: impl IntoIterator<Item = NodeRole>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            roles: roles.into_iter().collect(),
        }
    }

    /// Creates a master-eligible data node.
    #[must_use]
    pub fn data(id: impl Into<NodeId>, name: impl Into<NodeName>) -> Self {
        Self::new(id, name, [NodeRole::Master, NodeRole::Data])
    }

    /// Creates a master-only node that never holds shards.
    #[must_use]
    pub fn master_only(id: impl Into<NodeId>, name: impl Into<NodeName>) -> Self {
        Self::new(id, name, [NodeRole::Master])
    }

    /// Returns true if this node can hold shards.
    #[must_use]
    pub fn is_data_node(&self) -> bool {
        self.roles.contains(&NodeRole::Data)
    }
}

/// Resolves operator-facing node names to node ids.
pub trait NodeRegistry {
    /// Returns the id of the member named `name`, if it is in the cluster.
    fn resolve(&self, name: &NodeName) -> Option<&NodeId>;
}

/// The set of nodes in one cluster state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryNodes {
    /// Members by id.
    nodes: BTreeMap<NodeId, DiscoveryNode>,
    /// Name index, kept in step with `nodes`.
    names: BTreeMap<NodeName, NodeId>,
}

impl DiscoveryNodes {
    /// Creates an empty membership.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            names: BTreeMap::new(),
        }
    }

    /// Builds membership from a list of nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if two nodes share an id or a name.
    pub fn from_nodes(nodes: impl IntoIterator<Item = DiscoveryNode>) -> ClusterResult<Self> {
        let mut membership = Self::new();
        for node in nodes {
            membership.insert(node)?;
        }
        Ok(membership)
    }

    /// Returns a copy of this membership with `node` joined.
    ///
    /// # Errors
    ///
    /// Returns an error if the id or name is already in use.
    pub fn with_node(&self, node: DiscoveryNode) -> ClusterResult<Self> {
        let mut next = self.clone();
        next.insert(node)?;
        Ok(next)
    }

    /// Returns a copy of this membership with `node_id` removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is not a member.
    pub fn without_node(&self, node_id: &NodeId) -> ClusterResult<Self> {
        let mut next = self.clone();
        let node = next
            .nodes
            .remove(node_id)
            .ok_or_else(|| ClusterError::UnknownNode {
                node_id: node_id.clone(),
            })?;
        next.names.remove(&node.name);
        Ok(next)
    }

    fn insert(&mut self, node: DiscoveryNode) -> ClusterResult<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(ClusterError::DuplicateNodeId { node_id: node.id });
        }
        if self.names.contains_key(&node.name) {
            return Err(ClusterError::DuplicateNodeName { name: node.name });
        }
        self.names.insert(node.name.clone(), node.id.clone());
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Returns the member with the given id.
    #[must_use]
    pub fn get(&self, node_id: &NodeId) -> Option<&DiscoveryNode> {
        self.nodes.get(node_id)
    }

    /// Returns true if the node is a member.
    #[must_use]
    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// Returns the number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if there are no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates over members in node-id order.
    pub fn iter(&self) -> impl Iterator<Item = &DiscoveryNode> {
        self.nodes.values()
    }

    /// Iterates over members holding the data role.
    pub fn data_nodes(&self) -> impl Iterator<Item = &DiscoveryNode> {
        self.nodes.values().filter(|n| n.is_data_node())
    }
}

impl NodeRegistry for DiscoveryNodes {
    fn resolve(&self, name: &NodeName) -> Option<&NodeId> {
        self.names.get(name)
    }
}
