//! Cluster-state fixtures.
//!
//! `ebbctl` has no live cluster to talk to; it loads the membership, indices,
//! shard placement and shutdown records from a TOML file instead.
//!
//! ```toml
//! [[nodes]]
//! id = "a"
//! name = "node-a"
//!
//! [[indices]]
//! name = "logs"
//! number_of_shards = 1
//! number_of_replicas = 1
//!
//! [[allocations]]
//! index = "logs"
//! shard = 0
//! primary = true
//! node = "a"
//!
//! [[shutdowns]]
//! node_id = "a"
//! type = "REMOVE"
//! reason = "decommission"
//! ```

use std::path::Path;

use ebb_cluster::{
    ClusterError, ClusterState, DiscoveryNode, DiscoveryNodes, IndexMetadata, Metadata, NodeRole,
    RoutingTable, ShardRoutingState,
};
use ebb_core::{IndexName, Limits, NodeId, NodeName, ShardId};
use ebb_shutdown::{prepare_record, PutShutdownRequest, ShutdownError};
use serde::Deserialize;
use thiserror::Error;

/// Errors loading a fixture.
#[derive(Debug, Error)]
pub enum FixtureError {
    /// The file could not be read.
    #[error("failed to read fixture from {path}: {source}")]
    Io {
        /// Path that failed.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not a valid fixture.
    #[error("failed to parse fixture: {message}")]
    Parse {
        /// Parser message.
        message: String,
    },

    /// An allocation names a shard copy the index does not have.
    #[error("no unassigned {role} copy of shard {shard_id} left to place")]
    NoUnassignedCopy {
        /// The shard.
        shard_id: ShardId,
        /// "primary" or "replica".
        role: &'static str,
    },

    /// A RELOCATING allocation without a target.
    #[error("relocating copy of shard {shard_id} needs relocating_to")]
    MissingRelocationTarget {
        /// The shard.
        shard_id: ShardId,
    },

    /// The fixture describes an impossible cluster state.
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// A shutdown record in the fixture is invalid.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

fn default_roles() -> Vec<NodeRole> {
    vec![NodeRole::Master, NodeRole::Data]
}

/// A node in the fixture.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeFixture {
    /// Node id.
    pub id: NodeId,
    /// Node name.
    pub name: NodeName,
    /// Roles; master and data when omitted.
    #[serde(default = "default_roles")]
    pub roles: Vec<NodeRole>,
}

fn default_started() -> ShardRoutingState {
    ShardRoutingState::Started
}

/// Placement of one shard copy.
#[derive(Debug, Clone, Deserialize)]
pub struct AllocationFixture {
    /// Index name.
    pub index: String,
    /// Shard number.
    pub shard: u32,
    /// True for the primary copy.
    #[serde(default)]
    pub primary: bool,
    /// Node holding the copy.
    pub node: NodeId,
    /// Copy state; STARTED when omitted.
    #[serde(default = "default_started")]
    pub state: ShardRoutingState,
    /// Target node for a RELOCATING copy.
    #[serde(default)]
    pub relocating_to: Option<NodeId>,
}

/// A shutdown record in the fixture.
#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownFixture {
    /// The request that registered the record.
    #[serde(flatten)]
    pub request: PutShutdownRequest,
    /// Registration time.
    #[serde(default)]
    pub registered_at_us: u64,
}

/// A whole cluster state.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClusterFixture {
    /// Members.
    pub nodes: Vec<NodeFixture>,
    /// Indices; every copy starts unassigned.
    pub indices: Vec<IndexMetadata>,
    /// Placed copies.
    pub allocations: Vec<AllocationFixture>,
    /// Active shutdown records.
    pub shutdowns: Vec<ShutdownFixture>,
}

impl ClusterFixture {
    /// Loads a fixture from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, FixtureError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| FixtureError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;
        Self::from_toml(&contents)
    }

    /// Parses a fixture from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid fixture.
    pub fn from_toml(toml: &str) -> Result<Self, FixtureError> {
        toml::from_str(toml).map_err(|e| FixtureError::Parse {
            message: e.to_string(),
        })
    }

    /// Builds the cluster state the fixture describes.
    ///
    /// # Errors
    ///
    /// Returns an error if the fixture is inconsistent.
    pub fn into_state(self, limits: &Limits) -> Result<ClusterState, FixtureError> {
        let nodes = DiscoveryNodes::from_nodes(
            self.nodes
                .into_iter()
                .map(|n| DiscoveryNode::new(n.id, n.name, n.roles)),
        )?;
        let mut state = ClusterState::new(nodes, RoutingTable::new(), Metadata::new());
        for index in self.indices {
            state = state.with_index(index)?;
        }

        let mut routing = state.routing().clone();
        for allocation in self.allocations {
            let index = IndexName::new(allocation.index.as_str());
            if state.metadata().index(&index).is_none() {
                return Err(ClusterError::UnknownIndex { index }.into());
            }
            let mut placed_on = std::iter::once(&allocation.node).chain(allocation.relocating_to.as_ref());
            if let Some(node_id) = placed_on.find(|id| !state.nodes().contains(id)) {
                return Err(ClusterError::UnknownNode {
                    node_id: node_id.clone(),
                }
                .into());
            }
            place(&mut routing, allocation)?;
        }
        let mut state = state.with_routing(routing);

        for shutdown in self.shutdowns {
            let record = prepare_record(&state, &shutdown.request, shutdown.registered_at_us, limits)?;
            state = state.with_shutdowns(state.shutdowns().with_record(record));
        }
        Ok(state)
    }
}

fn place(routing: &mut RoutingTable, allocation: AllocationFixture) -> Result<(), FixtureError> {
    let shard_id = ShardId::new(allocation.index.as_str(), allocation.shard);
    let role = if allocation.primary { "primary" } else { "replica" };
    let copy = routing
        .copies_of(&shard_id)
        .find(|c| c.state == ShardRoutingState::Unassigned && c.primary == allocation.primary)
        .map(|c| c.allocation_id)
        .ok_or_else(|| FixtureError::NoUnassignedCopy {
            shard_id: shard_id.clone(),
            role,
        })?;

    routing.initialize(copy, allocation.node)?;
    match allocation.state {
        ShardRoutingState::Initializing | ShardRoutingState::Unassigned => {}
        ShardRoutingState::Started => routing.start(copy)?,
        ShardRoutingState::Relocating => {
            routing.start(copy)?;
            let target = allocation
                .relocating_to
                .ok_or(FixtureError::MissingRelocationTarget { shard_id })?;
            routing.relocate(copy, target)?;
        }
    }
    Ok(())
}
