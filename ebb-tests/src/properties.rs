//! Property definitions and checkers for Ebb shutdown tests.
//!
//! Properties are invariants that must hold for every cluster state the
//! simulation produces, not only the settled ones.

use std::collections::{BTreeMap, BTreeSet};

use ebb_cluster::{
    AllocationDecider, ClusterState, DecisionType, NodeRegistry, RoutingAllocation, ShardRouting,
    ShardRoutingState,
};
use ebb_core::{NodeId, ShardId, StateVersion};
use ebb_shutdown::{ReplacementAllocationDecider, ShardMigrationState, ShardMigrationStatusComputer};

// ============================================================================
// Property Violation Types
// ============================================================================

/// A violation of a shutdown property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyViolation {
    /// Status could not be computed for a consistent state.
    StatusFailed {
        /// The vacating node.
        node_id: NodeId,
        /// The computer's error.
        error: String,
    },
    /// A node holding no copies did not report COMPLETE.
    EmptyNodeNotComplete {
        /// The vacating node.
        node_id: NodeId,
        /// The reported status.
        status: ShardMigrationState,
        /// The reported remaining count.
        shards_remaining: u64,
    },
    /// More shards reported remaining than the node holds.
    RemainingExceedsCopies {
        /// The vacating node.
        node_id: NodeId,
        /// The reported remaining count.
        shards_remaining: u64,
        /// Copies assigned to the node.
        copies: u64,
    },
    /// Two computations over the same state disagreed.
    StatusNotDeterministic {
        /// The vacating node.
        node_id: NodeId,
        /// The state both computations read.
        version: StateVersion,
    },
    /// The replacement target would accept a shard it has no claim to.
    ReplacementTargetAccepts {
        /// The replacement target.
        target: NodeId,
        /// The unrelated shard.
        shard_id: ShardId,
        /// What the replacement decider answered.
        decision: Option<DecisionType>,
    },
    /// The replacement decider said NO without the operator-facing wording.
    ReplacementExplanationMissing {
        /// The replacement target.
        target: NodeId,
        /// The explanation given.
        explanation: String,
    },
    /// An unrelated shard began recovering onto a replacement target.
    ForeignShardOnReplacementTarget {
        /// The replacement target.
        target: NodeId,
        /// The vacating nodes it is replacing.
        vacating: Vec<NodeId>,
        /// The unrelated shard.
        shard_id: ShardId,
    },
}

impl std::fmt::Display for PropertyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StatusFailed { node_id, error } => {
                write!(f, "Status of node {node_id} failed: {error}")
            }
            Self::EmptyNodeNotComplete {
                node_id,
                status,
                shards_remaining,
            } => {
                write!(
                    f,
                    "Node {node_id} holds no copies but reports {status} with {shards_remaining} remaining"
                )
            }
            Self::RemainingExceedsCopies {
                node_id,
                shards_remaining,
                copies,
            } => {
                write!(
                    f,
                    "Node {node_id} reports {shards_remaining} remaining but holds {copies} copies"
                )
            }
            Self::StatusNotDeterministic { node_id, version } => {
                write!(f, "Status of node {node_id} differs between computations of state {version}")
            }
            Self::ReplacementTargetAccepts {
                target,
                shard_id,
                decision,
            } => {
                write!(
                    f,
                    "Replacement target {target} answered {decision:?} for unrelated shard {shard_id}"
                )
            }
            Self::ReplacementExplanationMissing { target, explanation } => {
                write!(f, "Replacement target {target} refused with unexpected wording: {explanation}")
            }
            Self::ForeignShardOnReplacementTarget {
                target,
                vacating,
                shard_id,
            } => {
                write!(
                    f,
                    "Shard {shard_id} is recovering onto {target} but did not come from any of {vacating:?}"
                )
            }
        }
    }
}

// ============================================================================
// Property Checker
// ============================================================================

/// Checks shutdown properties against cluster states.
#[derive(Debug)]
pub struct PropertyChecker {
    computer: ShardMigrationStatusComputer,
    states_checked: u64,
    violations: Vec<PropertyViolation>,
}

impl PropertyChecker {
    /// Creates a checker using `computer` for status properties.
    #[must_use]
    pub const fn new(computer: ShardMigrationStatusComputer) -> Self {
        Self {
            computer,
            states_checked: 0,
            violations: Vec::new(),
        }
    }

    /// Number of states checked so far.
    #[must_use]
    pub const fn states_checked(&self) -> u64 {
        self.states_checked
    }

    /// Every violation found so far.
    #[must_use]
    pub fn violations(&self) -> &[PropertyViolation] {
        &self.violations
    }

    /// Checks all properties and returns any violations.
    pub fn check_all(&mut self, state: &ClusterState) -> Vec<PropertyViolation> {
        self.states_checked += 1;

        let mut violations = Vec::new();
        violations.extend(self.check_status_bounds(state));
        violations.extend(self.check_status_deterministic(state));
        violations.extend(check_replacement_exclusive(state));
        violations.extend(check_replacement_placements(state));

        self.violations.extend(violations.clone());
        violations
    }

    /// Checks that empty nodes are COMPLETE and that remaining counts are
    /// bounded by the copies on the node.
    #[must_use]
    pub fn check_status_bounds(&self, state: &ClusterState) -> Vec<PropertyViolation> {
        let mut violations = Vec::new();

        for record in state.shutdowns().iter() {
            let node_id = record.node_id();
            let status = match self.computer.compute(record, state) {
                Ok(status) => status,
                Err(err) => {
                    violations.push(PropertyViolation::StatusFailed {
                        node_id: node_id.clone(),
                        error: err.to_string(),
                    });
                    continue;
                }
            };

            let copies = state.routing().shard_count_on_node(node_id) as u64;
            if copies == 0 && (status.status != ShardMigrationState::Complete || status.shards_remaining != 0) {
                violations.push(PropertyViolation::EmptyNodeNotComplete {
                    node_id: node_id.clone(),
                    status: status.status,
                    shards_remaining: status.shards_remaining,
                });
            }
            if status.shards_remaining > copies {
                violations.push(PropertyViolation::RemainingExceedsCopies {
                    node_id: node_id.clone(),
                    shards_remaining: status.shards_remaining,
                    copies,
                });
            }
        }

        violations
    }

    /// Checks that status is a pure function of the state.
    #[must_use]
    pub fn check_status_deterministic(&self, state: &ClusterState) -> Vec<PropertyViolation> {
        state
            .shutdowns()
            .iter()
            .filter(|record| self.computer.compute(record, state) != self.computer.compute(record, state))
            .map(|record| PropertyViolation::StatusNotDeterministic {
                node_id: record.node_id().clone(),
                version: state.version(),
            })
            .collect()
    }
}

/// Vacating nodes per joined replacement target that is still reserved.
///
/// A target stays reserved while at least one node it replaces is a member.
fn resolved_replacements(state: &ClusterState) -> BTreeMap<NodeId, BTreeSet<NodeId>> {
    let mut targets: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();
    for record in state.shutdowns().replacements() {
        let target = record
            .target_node_name()
            .and_then(|name| state.nodes().resolve(name));
        if let Some(target) = target {
            targets
                .entry(target.clone())
                .or_default()
                .insert(record.node_id().clone());
        }
    }
    targets.retain(|_, vacating| vacating.iter().any(|node_id| state.nodes().contains(node_id)));
    targets
}

fn originates_from(copy: &ShardRouting, vacating: &BTreeSet<NodeId>) -> bool {
    vacating.iter().any(|node_id| {
        copy.is_on(node_id) || (copy.is_relocation_target() && copy.relocating_node.as_ref() == Some(node_id))
    })
}

/// Checks that a reserved replacement target refuses every shard not coming
/// from a node it replaces, with the operator-facing explanation.
#[must_use]
pub fn check_replacement_exclusive(state: &ClusterState) -> Vec<PropertyViolation> {
    let mut violations = Vec::new();
    let allocation = RoutingAllocation::new(state);
    let decider = ReplacementAllocationDecider;

    for (target_id, vacating) in resolved_replacements(state) {
        let Some(target) = state.nodes().get(&target_id) else {
            continue;
        };
        for copy in state.routing().iter() {
            if originates_from(copy, &vacating) {
                continue;
            }
            match decider.can_allocate(copy, target, &allocation) {
                Some(decision) if decision.decision_type == DecisionType::No => {
                    if !decision.explanation.contains("is replacing the vacating node")
                        || !decision.explanation.contains(
                            "only data currently allocated to the source node may be allocated to it \
                             until the replacement is complete",
                        )
                    {
                        violations.push(PropertyViolation::ReplacementExplanationMissing {
                            target: target_id.clone(),
                            explanation: decision.explanation,
                        });
                    }
                }
                other => violations.push(PropertyViolation::ReplacementTargetAccepts {
                    target: target_id.clone(),
                    shard_id: copy.shard_id.clone(),
                    decision: other.map(|d| d.decision_type),
                }),
            }
        }
    }

    violations
}

/// Checks that every recovery onto a reserved replacement target is a
/// relocation from a node it replaces.
#[must_use]
pub fn check_replacement_placements(state: &ClusterState) -> Vec<PropertyViolation> {
    let mut violations = Vec::new();

    for (target, vacating) in resolved_replacements(state) {
        for copy in state.routing().shards_on_node(&target) {
            if copy.state == ShardRoutingState::Initializing && !originates_from(copy, &vacating) {
                violations.push(PropertyViolation::ForeignShardOnReplacementTarget {
                    target: target.clone(),
                    vacating: vacating.iter().cloned().collect(),
                    shard_id: copy.shard_id.clone(),
                });
            }
        }
    }

    violations
}
