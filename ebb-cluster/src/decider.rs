//! Allocation deciders.
//!
//! An `AllocationDecider` votes on whether a shard copy may be placed on (or
//! stay on) a node. `AllocationDeciders` is the ordered chain: votes are folded
//! left-to-right and the first NO wins, unless the NO comes from a filter that
//! another decider in the chain overrides for this (shard, node) pair.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::cluster_state::ClusterState;
use crate::metadata::Metadata;
use crate::node::{DiscoveryNode, DiscoveryNodes};
use crate::routing_table::RoutingTable;
use crate::shard_routing::ShardRouting;
use crate::shutdown_metadata::ShutdownMetadata;

/// Outcome of a single vote or of the whole chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionType {
    /// The placement is not allowed.
    No,
    /// The placement is allowed but must wait.
    Throttle,
    /// The placement is allowed.
    Yes,
}

impl fmt::Display for DecisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::No => write!(f, "NO"),
            Self::Throttle => write!(f, "THROTTLE"),
            Self::Yes => write!(f, "YES"),
        }
    }
}

/// One decider's vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    /// The vote.
    pub decision_type: DecisionType,
    /// Name of the decider that voted.
    pub decider: &'static str,
    /// Why.
    pub explanation: String,
}

impl Decision {
    /// A YES vote.
    #[must_use]
    pub fn yes(decider: &'static str, explanation: impl Into<String>) -> Self {
        Self {
            decision_type: DecisionType::Yes,
            decider,
            explanation: explanation.into(),
        }
    }

    /// A NO vote.
    #[must_use]
    pub fn no(decider: &'static str, explanation: impl Into<String>) -> Self {
        Self {
            decision_type: DecisionType::No,
            decider,
            explanation: explanation.into(),
        }
    }

    /// A THROTTLE vote.
    #[must_use]
    pub fn throttle(decider: &'static str, explanation: impl Into<String>) -> Self {
        Self {
            decision_type: DecisionType::Throttle,
            decider,
            explanation: explanation.into(),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.decider, self.explanation)
    }
}

/// Call-scoped context handed to every decider: one fully-formed cluster state.
#[derive(Debug, Clone, Copy)]
pub struct RoutingAllocation<'a> {
    state: &'a ClusterState,
}

impl<'a> RoutingAllocation<'a> {
    /// Creates a context over `state`.
    #[must_use]
    pub const fn new(state: &'a ClusterState) -> Self {
        Self { state }
    }

    /// The whole cluster state.
    #[must_use]
    pub const fn state(&self) -> &'a ClusterState {
        self.state
    }

    /// Cluster membership.
    #[must_use]
    pub fn nodes(&self) -> &'a DiscoveryNodes {
        self.state.nodes()
    }

    /// Shard placement.
    #[must_use]
    pub fn routing(&self) -> &'a RoutingTable {
        self.state.routing()
    }

    /// Index settings.
    #[must_use]
    pub fn metadata(&self) -> &'a Metadata {
        self.state.metadata()
    }

    /// Active shutdown records.
    #[must_use]
    pub fn shutdowns(&self) -> &'a ShutdownMetadata {
        self.state.shutdowns()
    }
}

/// A rule voting on shard placement.
///
/// Returning `None` abstains. Implementations must be pure functions of their
/// arguments so the chain can be evaluated concurrently without locks.
pub trait AllocationDecider: fmt::Debug + Send + Sync {
    /// Name used in explanations.
    fn name(&self) -> &'static str;

    /// Votes on placing `shard` onto `node`.
    fn can_allocate(
        &self,
        _shard: &ShardRouting,
        _node: &DiscoveryNode,
        _allocation: &RoutingAllocation<'_>,
    ) -> Option<Decision> {
        None
    }

    /// Votes on whether `shard` may stay on `node`.
    fn can_remain(
        &self,
        _shard: &ShardRouting,
        _node: &DiscoveryNode,
        _allocation: &RoutingAllocation<'_>,
    ) -> Option<Decision> {
        None
    }

    /// Returns true if this decider enforces user-configured allocation filters.
    fn is_filter(&self) -> bool {
        false
    }

    /// Returns a reason if filter vetoes should be ignored for this (shard, node) pair.
    fn filter_override(
        &self,
        _shard: &ShardRouting,
        _node: &DiscoveryNode,
        _allocation: &RoutingAllocation<'_>,
    ) -> Option<String> {
        None
    }
}

/// Result of folding the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationOutcome {
    /// Combined vote.
    pub decision_type: DecisionType,
    /// Every non-abstaining vote, in chain order, up to and including the deciding NO.
    pub decisions: Vec<Decision>,
}

impl AllocationOutcome {
    /// Returns true for YES or THROTTLE.
    #[must_use]
    pub fn allows(&self) -> bool {
        self.decision_type != DecisionType::No
    }

    /// Returns the NO votes.
    pub fn vetoes(&self) -> impl Iterator<Item = &Decision> {
        self.decisions
            .iter()
            .filter(|d| d.decision_type == DecisionType::No)
    }
}

/// Ordered chain of deciders.
#[derive(Debug, Clone, Default)]
pub struct AllocationDeciders {
    deciders: Vec<Arc<dyn AllocationDecider>>,
}

impl AllocationDeciders {
    /// Creates a chain evaluated in the given order.
    #[must_use]
    pub fn new(deciders: Vec<Arc<dyn AllocationDecider>>) -> Self {
        Self { deciders }
    }

    /// Names of the deciders, in chain order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.deciders.iter().map(|d| d.name())
    }

    /// Folds every decider's `can_allocate` vote for placing `shard` onto `node`.
    #[must_use]
    pub fn can_allocate(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> AllocationOutcome {
        let overridden = || {
            self.deciders
                .iter()
                .find_map(|d| d.filter_override(shard, node, allocation))
        };
        self.fold(|d| d.can_allocate(shard, node, allocation), overridden)
    }

    /// Folds every decider's `can_remain` vote for keeping `shard` on `node`.
    #[must_use]
    pub fn can_remain(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> AllocationOutcome {
        self.fold(|d| d.can_remain(shard, node, allocation), || None)
    }

    fn fold<V, O>(&self, mut vote: V, overridden: O) -> AllocationOutcome
    where
        V: FnMut(&dyn AllocationDecider) -> Option<Decision>,
        O: Fn() -> Option<String>,
    {
        let mut decisions = Vec::new();
        let mut throttled = false;

        for decider in &self.deciders {
            let Some(decision) = vote(decider.as_ref()) else {
                continue;
            };
            match decision.decision_type {
                DecisionType::No => {
                    if decider.is_filter() {
                        if let Some(reason) = overridden() {
                            decisions.push(Decision::yes(
                                decision.decider,
                                format!("{} (overridden: {reason})", decision.explanation),
                            ));
                            continue;
                        }
                    }
                    decisions.push(decision);
                    return AllocationOutcome {
                        decision_type: DecisionType::No,
                        decisions,
                    };
                }
                DecisionType::Throttle => {
                    throttled = true;
                    decisions.push(decision);
                }
                DecisionType::Yes => decisions.push(decision),
            }
        }

        AllocationOutcome {
            decision_type: if throttled {
                DecisionType::Throttle
            } else {
                DecisionType::Yes
            },
            decisions,
        }
    }
}
