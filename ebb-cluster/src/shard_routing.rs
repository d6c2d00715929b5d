//! Shard copy placement and state.
//!
//! Each copy of a shard moves through these states:
//! 1. **Unassigned**: Not placed on any node
//! 2. **Initializing**: Recovering onto `current_node`
//! 3. **Started**: Serving on `current_node`
//! 4. **Relocating**: Started on `current_node`, copying to `relocating_node`
//!
//! A relocation is represented by two copies: the RELOCATING source and an
//! INITIALIZING target whose `relocating_node` points back at the source node.
//! Starting the target retires the source.

use std::fmt;

use ebb_core::{AllocationId, NodeId, ShardId};
use serde::{Deserialize, Serialize};

/// State of one shard copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShardRoutingState {
    /// Not placed on any node.
    Unassigned,
    /// Recovering onto its node.
    Initializing,
    /// Serving on its node.
    Started,
    /// Serving on its node while being copied elsewhere.
    Relocating,
}

impl ShardRoutingState {
    /// Returns true if the copy is placed on a node.
    #[must_use]
    pub const fn is_assigned(self) -> bool {
        !matches!(self, Self::Unassigned)
    }

    /// Returns true if the copy is serving (started or relocating).
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Started | Self::Relocating)
    }

    /// Returns a human-readable description of the state.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Unassigned => "not allocated to any node",
            Self::Initializing => "recovering",
            Self::Started => "serving",
            Self::Relocating => "serving while moving to another node",
        }
    }
}

impl fmt::Display for ShardRoutingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unassigned => write!(f, "UNASSIGNED"),
            Self::Initializing => write!(f, "INITIALIZING"),
            Self::Started => write!(f, "STARTED"),
            Self::Relocating => write!(f, "RELOCATING"),
        }
    }
}

/// One copy of a shard and where it lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardRouting {
    /// Unique id of this copy.
    pub allocation_id: AllocationId,
    /// The shard this is a copy of.
    pub shard_id: ShardId,
    /// True for the primary copy.
    pub primary: bool,
    /// Current state.
    pub state: ShardRoutingState,
    /// Node holding the copy (absent when unassigned).
    pub current_node: Option<NodeId>,
    /// For a RELOCATING copy, the target node; for a relocation target, the source node.
    pub relocating_node: Option<NodeId>,
}

impl ShardRouting {
    /// Creates an unassigned copy.
    #[must_use]
    pub const fn unassigned(allocation_id: AllocationId, shard_id: ShardId, primary: bool) -> Self {
        Self {
            allocation_id,
            shard_id,
            primary,
            state: ShardRoutingState::Unassigned,
            current_node: None,
            relocating_node: None,
        }
    }

    /// Returns true if this copy is the INITIALIZING half of a relocation.
    #[must_use]
    pub const fn is_relocation_target(&self) -> bool {
        matches!(self.state, ShardRoutingState::Initializing) && self.relocating_node.is_some()
    }

    /// Returns true if this copy is currently on `node_id`.
    #[must_use]
    pub fn is_on(&self, node_id: &NodeId) -> bool {
        self.current_node.as_ref() == Some(node_id)
    }

    /// Returns "primary" or "replica".
    #[must_use]
    pub const fn role_label(&self) -> &'static str {
        if self.primary {
            "primary"
        } else {
            "replica"
        }
    }
}

impl fmt::Display for ShardRouting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) {}", self.shard_id, self.role_label(), self.state)?;
        if let Some(node) = &self.current_node {
            write!(f, " on [{node}]")?;
        }
        if let Some(other) = &self.relocating_node {
            if self.is_relocation_target() {
                write!(f, " from [{other}]")?;
            } else {
                write!(f, " to [{other}]")?;
            }
        }
        Ok(())
    }
}
