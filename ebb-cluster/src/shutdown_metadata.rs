//! Shutdown records.
//!
//! A `ShutdownRecord` marks one node for removal, restart or replacement.
//! Records are validated once, at creation, and are never partially mutated:
//! a later put for the same node replaces the record wholesale.

use std::collections::BTreeMap;
use std::fmt;

use ebb_core::{NodeId, NodeName};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShutdownType {
    /// The node leaves the cluster for good.
    Remove,
    /// The node restarts and keeps its data.
    Restart,
    /// The node is replaced by a named successor.
    Replace,
}

impl ShutdownType {
    /// Returns true if the node's data must move off it.
    #[must_use]
    pub const fn removes_node(self) -> bool {
        matches!(self, Self::Remove | Self::Replace)
    }
}

impl fmt::Display for ShutdownType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remove => write!(f, "REMOVE"),
            Self::Restart => write!(f, "RESTART"),
            Self::Replace => write!(f, "REPLACE"),
        }
    }
}

/// A shutdown record that violates the record invariants.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShutdownRecordError {
    /// The node id is empty.
    #[error("node id must not be empty")]
    EmptyNodeId,

    /// REPLACE without a target node name.
    #[error("target node name is required for REPLACE shutdown of node [{node_id}]")]
    MissingTargetNode {
        /// The vacating node.
        node_id: NodeId,
    },

    /// REMOVE or RESTART with a target node name.
    #[error("target node name is only valid for REPLACE, not {shutdown_type} shutdown of node [{node_id}]")]
    UnexpectedTargetNode {
        /// The vacating node.
        node_id: NodeId,
        /// The requested type.
        shutdown_type: ShutdownType,
    },

    /// REPLACE whose target is the vacating node itself.
    #[error("node [{node_id}] cannot be replaced by itself")]
    SelfReplacement {
        /// The vacating node.
        node_id: NodeId,
    },

    /// Allocation delay on a shutdown other than RESTART.
    #[error("allocation delay is only valid for RESTART, not {shutdown_type} shutdown of node [{node_id}]")]
    UnexpectedAllocationDelay {
        /// The vacating node.
        node_id: NodeId,
        /// The requested type.
        shutdown_type: ShutdownType,
    },
}

/// An active shutdown of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShutdownRecord {
    node_id: NodeId,
    #[serde(rename = "type")]
    shutdown_type: ShutdownType,
    reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_node_name: Option<NodeName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    allocation_delay_us: Option<u64>,
    registered_at_us: u64,
}

impl ShutdownRecord {
    /// Creates a validated record.
    ///
    /// # Errors
    ///
    /// Returns an error if the target node name is missing for REPLACE, present
    /// for REMOVE/RESTART, names the vacating node, if an allocation delay is
    /// given for anything but RESTART, or if the node id is empty.
    pub fn new(
        node_id: NodeId,
        shutdown_type: ShutdownType,
        reason: impl Into<String>,
        target_node_name: Option<NodeName>,
        allocation_delay_us: Option<u64>,
        registered_at_us: u64,
    ) -> Result<Self, ShutdownRecordError> {
        if node_id.is_empty() {
            return Err(ShutdownRecordError::EmptyNodeId);
        }
        match (shutdown_type, &target_node_name) {
            (ShutdownType::Replace, None) => {
                return Err(ShutdownRecordError::MissingTargetNode { node_id });
            }
            (ShutdownType::Replace, Some(target)) if target.is_empty() => {
                return Err(ShutdownRecordError::MissingTargetNode { node_id });
            }
            (ShutdownType::Replace, Some(target)) if target.as_str() == node_id.as_str() => {
                return Err(ShutdownRecordError::SelfReplacement { node_id });
            }
            (ShutdownType::Remove | ShutdownType::Restart, Some(_)) => {
                return Err(ShutdownRecordError::UnexpectedTargetNode {
                    node_id,
                    shutdown_type,
                });
            }
            _ => {}
        }
        if allocation_delay_us.is_some() && shutdown_type != ShutdownType::Restart {
            return Err(ShutdownRecordError::UnexpectedAllocationDelay {
                node_id,
                shutdown_type,
            });
        }

        Ok(Self {
            node_id,
            shutdown_type,
            reason: reason.into(),
            target_node_name,
            allocation_delay_us,
            registered_at_us,
        })
    }

    /// The vacating node.
    #[must_use]
    pub const fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Kind of shutdown.
    #[must_use]
    pub const fn shutdown_type(&self) -> ShutdownType {
        self.shutdown_type
    }

    /// Operator-supplied reason.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Name of the replacement node (REPLACE only).
    #[must_use]
    pub const fn target_node_name(&self) -> Option<&NodeName> {
        self.target_node_name.as_ref()
    }

    /// Explicit allocation delay (RESTART only).
    #[must_use]
    pub const fn allocation_delay_us(&self) -> Option<u64> {
        self.allocation_delay_us
    }

    /// Allocation delay in effect: the explicit one, or `default_us` for RESTART.
    #[must_use]
    pub fn effective_allocation_delay_us(&self, default_us: u64) -> Option<u64> {
        match self.shutdown_type {
            ShutdownType::Restart => Some(self.allocation_delay_us.unwrap_or(default_us)),
            ShutdownType::Remove | ShutdownType::Replace => None,
        }
    }

    /// Registration timestamp in microseconds.
    #[must_use]
    pub const fn registered_at_us(&self) -> u64 {
        self.registered_at_us
    }
}

/// The active shutdown records, keyed by node id.
///
/// Also remembers the newest registration time ever stored, so deleting the
/// newest record does not let registration time go backwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownMetadata {
    records: BTreeMap<NodeId, ShutdownRecord>,
    registered_high_water_us: u64,
}

impl ShutdownMetadata {
    /// Creates an empty set of records.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record for `node_id`.
    #[must_use]
    pub fn get(&self, node_id: &NodeId) -> Option<&ShutdownRecord> {
        self.records.get(node_id)
    }

    /// Returns true if `node_id` has an active record.
    #[must_use]
    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.records.contains_key(node_id)
    }

    /// Returns the number of active records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no record is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates over records in node-id order.
    pub fn iter(&self) -> impl Iterator<Item = &ShutdownRecord> {
        self.records.values()
    }

    /// Iterates over REPLACE records.
    pub fn replacements(&self) -> impl Iterator<Item = &ShutdownRecord> {
        self.records
            .values()
            .filter(|r| r.shutdown_type == ShutdownType::Replace)
    }

    /// Returns true if `node_id` has a REMOVE or REPLACE record.
    #[must_use]
    pub fn is_vacating(&self, node_id: &NodeId) -> bool {
        self.records
            .get(node_id)
            .is_some_and(|r| r.shutdown_type.removes_node())
    }

    /// Returns the newest registration timestamp of any record stored so far,
    /// including deleted ones, or 0 if none was ever stored.
    #[must_use]
    pub const fn latest_registered_at_us(&self) -> u64 {
        self.registered_high_water_us
    }

    /// Returns a copy with `record` put, replacing any record for the same node.
    #[must_use]
    pub fn with_record(&self, record: ShutdownRecord) -> Self {
        let mut records = self.records.clone();
        let registered_high_water_us = self.registered_high_water_us.max(record.registered_at_us);
        records.insert(record.node_id.clone(), record);
        Self {
            records,
            registered_high_water_us,
        }
    }

    /// Returns a copy without the record for `node_id`.
    #[must_use]
    pub fn without_record(&self, node_id: &NodeId) -> Self {
        let mut records = self.records.clone();
        records.remove(node_id);
        Self {
            records,
            registered_high_water_us: self.registered_high_water_us,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(
        shutdown_type: ShutdownType,
        target: Option<&str>,
        delay: Option<u64>,
    ) -> Result<ShutdownRecord, ShutdownRecordError> {
        ShutdownRecord::new(
            NodeId::new("node-a"),
            shutdown_type,
            "maintenance",
            target.map(NodeName::new),
            delay,
            10,
        )
    }

    #[test]
    fn test_valid_records() {
        let remove = record(ShutdownType::Remove, None, None).unwrap();
        assert_eq!(remove.shutdown_type(), ShutdownType::Remove);
        assert!(remove.target_node_name().is_none());

        let replace = record(ShutdownType::Replace, Some("node-b"), None).unwrap();
        assert_eq!(replace.target_node_name(), Some(&NodeName::new("node-b")));

        let restart = record(ShutdownType::Restart, None, Some(1_000)).unwrap();
        assert_eq!(restart.allocation_delay_us(), Some(1_000));
    }

    #[test]
    fn test_target_presence_invariant() {
        assert!(matches!(
            record(ShutdownType::Replace, None, None),
            Err(ShutdownRecordError::MissingTargetNode { .. })
        ));
        assert!(matches!(
            record(ShutdownType::Replace, Some(""), None),
            Err(ShutdownRecordError::MissingTargetNode { .. })
        ));
        assert!(matches!(
            record(ShutdownType::Remove, Some("node-b"), None),
            Err(ShutdownRecordError::UnexpectedTargetNode { .. })
        ));
        assert!(matches!(
            record(ShutdownType::Restart, Some("node-b"), None),
            Err(ShutdownRecordError::UnexpectedTargetNode { .. })
        ));
    }

    #[test]
    fn test_self_replacement_rejected() {
        assert!(matches!(
            record(ShutdownType::Replace, Some("node-a"), None),
            Err(ShutdownRecordError::SelfReplacement { .. })
        ));
    }

    #[test]
    fn test_allocation_delay_only_for_restart() {
        assert!(matches!(
            record(ShutdownType::Remove, None, Some(5)),
            Err(ShutdownRecordError::UnexpectedAllocationDelay { .. })
        ));

        let restart = record(ShutdownType::Restart, None, None).unwrap();
        assert_eq!(restart.effective_allocation_delay_us(300), Some(300));
        let remove = record(ShutdownType::Remove, None, None).unwrap();
        assert_eq!(remove.effective_allocation_delay_us(300), None);
    }

    #[test]
    fn test_empty_node_id_rejected() {
        let err = ShutdownRecord::new(NodeId::new(""), ShutdownType::Remove, "", None, None, 0).unwrap_err();
        assert_eq!(err, ShutdownRecordError::EmptyNodeId);
    }

    #[test]
    fn test_put_replaces_wholesale() {
        let first = record(ShutdownType::Remove, None, None).unwrap();
        let second = record(ShutdownType::Restart, None, None).unwrap();

        let metadata = ShutdownMetadata::new().with_record(first);
        assert!(metadata.is_vacating(&NodeId::new("node-a")));

        let metadata = metadata.with_record(second);
        assert_eq!(metadata.len(), 1);
        assert!(!metadata.is_vacating(&NodeId::new("node-a")));

        let metadata = metadata.without_record(&NodeId::new("node-a"));
        assert!(metadata.is_empty());
        assert_eq!(metadata.latest_registered_at_us(), 10);
    }

    #[test]
    fn test_registration_high_water_survives_delete() {
        assert_eq!(ShutdownMetadata::new().latest_registered_at_us(), 0);

        let older = ShutdownRecord::new(NodeId::new("node-b"), ShutdownType::Remove, "older", None, None, 4).unwrap();
        let metadata = ShutdownMetadata::new()
            .with_record(record(ShutdownType::Remove, None, None).unwrap())
            .with_record(older);
        assert_eq!(metadata.latest_registered_at_us(), 10);

        let metadata = metadata.without_record(&NodeId::new("node-a"));
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata.latest_registered_at_us(), 10);
    }

    #[test]
    fn test_serialize_shape() {
        let replace = record(ShutdownType::Replace, Some("node-b"), None).unwrap();
        let json = serde_json::to_value(&replace).unwrap();
        assert_eq!(json["type"], "REPLACE");
        assert_eq!(json["target_node_name"], "node-b");
        assert!(json.get("allocation_delay_us").is_none());
    }
}
