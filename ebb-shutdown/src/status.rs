//! Shard migration status.
//!
//! `ShardMigrationStatusComputer::compute` is a pure function of a shutdown
//! record and one cluster state. It reads only the copies on the vacating node,
//! so its cost is bounded by that node's shard count times the candidate nodes.
//!
//! Each copy on the vacating node is classified:
//!
//! | Copy state                 | Classification                          |
//! |----------------------------|-----------------------------------------|
//! | RELOCATING                 | moving                                  |
//! | INITIALIZING (onto node)   | pending                                 |
//! | STARTED, some candidate ok | moving                                  |
//! | STARTED, all candidates NO | covered if started elsewhere, else stalled |
//!
//! The per-shard results reduce with precedence
//! STALLED > IN_PROGRESS > NOT_STARTED > COMPLETE.

use std::fmt;
use std::sync::Arc;

use ebb_cluster::{
    AllocationDeciders, ClusterState, DiscoveryNode, NodeRegistry, RoutingAllocation,
    ShardRouting, ShardRoutingState, ShutdownRecord, ShutdownType,
};
use ebb_core::{Limits, NodeId, NodeName};
use serde::Serialize;

use crate::error::StatusError;

/// Overall migration state of one vacating node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShardMigrationState {
    /// Shards remain but none has started moving.
    NotStarted,
    /// At least one shard is moving and none is stuck.
    InProgress,
    /// At least one shard has nowhere to go.
    Stalled,
    /// Nothing left that needs to move.
    Complete,
}

impl fmt::Display for ShardMigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "NOT_STARTED"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Stalled => write!(f, "STALLED"),
            Self::Complete => write!(f, "COMPLETE"),
        }
    }
}

/// Derived migration status. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    /// Overall state.
    pub status: ShardMigrationState,
    /// Shards that still have to leave the node.
    pub shards_remaining: u64,
    /// Operator diagnostics.
    pub explanation: Vec<String>,
}

impl MigrationStatus {
    /// Status of a node with nothing left on it.
    #[must_use]
    pub const fn complete() -> Self {
        Self {
            status: ShardMigrationState::Complete,
            shards_remaining: 0,
            explanation: Vec::new(),
        }
    }
}

/// How one copy on the vacating node is doing.
#[derive(Debug)]
enum ShardProgress {
    Moving,
    Pending,
    Covered,
    Stalled(String),
}

/// Where the vacating node's shards may go.
enum Candidates<'a> {
    Nodes(Vec<&'a DiscoveryNode>),
    MissingTarget(&'a NodeName),
}

/// Computes migration status from a shutdown record and a cluster state.
#[derive(Debug, Clone)]
pub struct ShardMigrationStatusComputer {
    deciders: Arc<AllocationDeciders>,
    max_explanations: usize,
}

impl ShardMigrationStatusComputer {
    /// Creates a computer that consults `deciders`.
    #[must_use]
    pub fn new(deciders: Arc<AllocationDeciders>, limits: &Limits) -> Self {
        Self {
            deciders,
            max_explanations: usize::try_from(limits.max_status_explanations).unwrap_or(usize::MAX),
        }
    }

    /// The decider chain consulted for every candidate.
    #[must_use]
    pub fn deciders(&self) -> &Arc<AllocationDeciders> {
        &self.deciders
    }

    /// Computes the migration status of `record`'s node in `state`.
    ///
    /// Only the copies on the node are visited. A REPLACE record checks each
    /// copy against its single target; REMOVE and RESTART check candidates in
    /// node-id order and stop at the first that allows the move, so the cost
    /// is the node's copy count times the cluster's node count only when
    /// copies are stalled.
    ///
    /// # Errors
    ///
    /// Returns an error if copies are assigned to the node but the node is not a member.
    pub fn compute(&self, record: &ShutdownRecord, state: &ClusterState) -> Result<MigrationStatus, StatusError> {
        let node_id = record.node_id();
        let mut shards: Vec<&ShardRouting> = state.routing().shards_on_node(node_id).collect();
        if shards.is_empty() {
            return Ok(MigrationStatus::complete());
        }
        if !state.nodes().contains(node_id) {
            return Err(StatusError::InconsistentRouting {
                node_id: node_id.clone(),
                shard_id: shards[0].shard_id.clone(),
                version: state.version(),
            });
        }
        shards.sort_by(|a, b| {
            (&a.shard_id, !a.primary, a.allocation_id).cmp(&(&b.shard_id, !b.primary, b.allocation_id))
        });

        let candidates = candidates(record, state);
        let allocation = RoutingAllocation::new(state);

        let mut moving = 0_u64;
        let mut pending = 0_u64;
        let mut covered = 0_u64;
        let mut stalled = Vec::new();
        for shard in &shards {
            match self.classify(shard, node_id, &candidates, &allocation) {
                ShardProgress::Moving => moving += 1,
                ShardProgress::Pending => pending += 1,
                ShardProgress::Covered => covered += 1,
                ShardProgress::Stalled(reason) => stalled.push(reason),
            }
        }

        let total = shards.len() as u64;
        let mut explanation = Vec::new();
        let status = if !stalled.is_empty() {
            explanation.extend(stalled.into_iter().take(self.max_explanations));
            ShardMigrationState::Stalled
        } else if moving > 0 {
            ShardMigrationState::InProgress
        } else if pending > 0 {
            explanation.push(
                "all remaining shards are currently INITIALIZING and must finish before they can be moved off this node"
                    .to_string(),
            );
            ShardMigrationState::NotStarted
        } else {
            ShardMigrationState::Complete
        };
        if covered > 0 && explanation.len() < self.max_explanations.max(1) {
            explanation.push(format!(
                "[{covered}] shards cannot be moved away from this node but have at least one copy on another node in the cluster"
            ));
        }

        Ok(MigrationStatus {
            status,
            shards_remaining: total - covered,
            explanation,
        })
    }

    fn classify(
        &self,
        shard: &ShardRouting,
        vacating: &NodeId,
        candidates: &Candidates<'_>,
        allocation: &RoutingAllocation<'_>,
    ) -> ShardProgress {
        match shard.state {
            ShardRoutingState::Relocating => return ShardProgress::Moving,
            ShardRoutingState::Initializing | ShardRoutingState::Unassigned => return ShardProgress::Pending,
            ShardRoutingState::Started => {}
        }

        let reasons = match candidates {
            Candidates::MissingTarget(name) => {
                vec![format!("replacement target [{name}] has not joined the cluster")]
            }
            Candidates::Nodes(nodes) => {
                let mut reasons = Vec::new();
                for node in nodes {
                    let outcome = self.deciders.can_allocate(shard, node, allocation);
                    if outcome.allows() {
                        return ShardProgress::Moving;
                    }
                    reasons.extend(outcome.vetoes().map(|d| format!("node [{}]: {d}", node.id)));
                }
                if nodes.is_empty() {
                    reasons.push("no eligible node exists".to_string());
                }
                reasons
            }
        };

        if has_started_copy_elsewhere(shard, vacating, allocation) {
            ShardProgress::Covered
        } else {
            ShardProgress::Stalled(format!(
                "shard {} ({}) cannot move: {}",
                shard.shard_id,
                shard.role_label(),
                reasons.join("; ")
            ))
        }
    }
}

fn candidates<'a>(record: &'a ShutdownRecord, state: &'a ClusterState) -> Candidates<'a> {
    let vacating = record.node_id();
    match (record.shutdown_type(), record.target_node_name()) {
        (ShutdownType::Replace, Some(name)) => match state.nodes().resolve(name) {
            Some(target) => Candidates::Nodes(
                state
                    .nodes()
                    .get(target)
                    .filter(|n| &n.id != vacating)
                    .into_iter()
                    .collect(),
            ),
            None => Candidates::MissingTarget(name),
        },
        _ => Candidates::Nodes(state.nodes().iter().filter(|n| &n.id != vacating).collect()),
    }
}

/// Returns true if another STARTED copy of the shard lives on a node without a shutdown record.
fn has_started_copy_elsewhere(shard: &ShardRouting, vacating: &NodeId, allocation: &RoutingAllocation<'_>) -> bool {
    allocation.routing().copies_of(&shard.shard_id).any(|copy| {
        copy.allocation_id != shard.allocation_id
            && copy.state == ShardRoutingState::Started
            && copy
                .current_node
                .as_ref()
                .is_some_and(|node| node != vacating && !allocation.shutdowns().contains(node))
    })
}
