//! Request and response types of the shutdown API.

use ebb_cluster::{ShutdownRecord, ShutdownType};
use ebb_core::{NodeId, NodeName};
use serde::{Deserialize, Serialize};

use crate::status::MigrationStatus;

/// Registers (or replaces) the shutdown record of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutShutdownRequest {
    /// Node to shut down.
    pub node_id: NodeId,
    /// Kind of shutdown.
    #[serde(rename = "type")]
    pub shutdown_type: ShutdownType,
    /// Why.
    pub reason: String,
    /// Allocation delay (RESTART only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation_delay_us: Option<u64>,
    /// Replacement node name (REPLACE only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_node_name: Option<NodeName>,
}

impl PutShutdownRequest {
    fn new(node_id: impl Into<NodeId>, shutdown_type: ShutdownType, reason: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            shutdown_type,
            reason: reason.into(),
            allocation_delay_us: None,
            target_node_name: None,
        }
    }

    /// A REMOVE request.
    #[must_use]
    pub fn remove(node_id: impl Into<NodeId>, reason: impl Into<String>) -> Self {
        Self::new(node_id, ShutdownType::Remove, reason)
    }

    /// A RESTART request.
    #[must_use]
    pub fn restart(node_id: impl Into<NodeId>, reason: impl Into<String>) -> Self {
        Self::new(node_id, ShutdownType::Restart, reason)
    }

    /// A REPLACE request naming the node that takes over.
    #[must_use]
    pub fn replace(node_id: impl Into<NodeId>, target_node_name: impl Into<NodeName>, reason: impl Into<String>) -> Self {
        Self {
            target_node_name: Some(target_node_name.into()),
            ..Self::new(node_id, ShutdownType::Replace, reason)
        }
    }

    /// Sets the allocation delay.
    #[must_use]
    pub const fn with_allocation_delay_us(mut self, delay_us: u64) -> Self {
        self.allocation_delay_us = Some(delay_us);
        self
    }
}

/// Acknowledges a put or delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcknowledgedResponse {
    /// True once the change is part of the published cluster state.
    pub acknowledged: bool,
}

/// Asks for the status of one node, or of every node with a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetShutdownStatusRequest {
    /// Node to report on; `None` reports all.
    #[serde(default)]
    pub node_id: Option<NodeId>,
}

impl GetShutdownStatusRequest {
    /// Status of every node with a record.
    #[must_use]
    pub const fn all() -> Self {
        Self { node_id: None }
    }

    /// Status of one node.
    #[must_use]
    pub fn node(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: Some(node_id.into()),
        }
    }
}

/// Record and migration status of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SingleNodeShutdownStatus {
    /// The vacating node.
    pub node_id: NodeId,
    /// Kind of shutdown.
    #[serde(rename = "type")]
    pub shutdown_type: ShutdownType,
    /// Why.
    pub reason: String,
    /// Replacement node name (REPLACE only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_node_name: Option<NodeName>,
    /// Allocation delay in effect (RESTART only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocation_delay_us: Option<u64>,
    /// When the record was registered.
    pub registered_at_us: u64,
    /// Derived migration status.
    pub migration_status: MigrationStatus,
}

impl SingleNodeShutdownStatus {
    /// Combines a record with its computed status.
    #[must_use]
    pub fn new(record: &ShutdownRecord, migration_status: MigrationStatus, default_restart_delay_us: u64) -> Self {
        Self {
            node_id: record.node_id().clone(),
            shutdown_type: record.shutdown_type(),
            reason: record.reason().to_string(),
            target_node_name: record.target_node_name().cloned(),
            allocation_delay_us: record.effective_allocation_delay_us(default_restart_delay_us),
            registered_at_us: record.registered_at_us(),
            migration_status,
        }
    }
}

/// Statuses ordered by node id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GetShutdownStatusResponse {
    /// One entry per matching record.
    pub shutdown_statuses: Vec<SingleNodeShutdownStatus>,
}

/// Deletes the shutdown record of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteShutdownRequest {
    /// Node whose record is removed.
    pub node_id: NodeId,
}

impl DeleteShutdownRequest {
    /// Creates a delete request.
    #[must_use]
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
        }
    }
}
