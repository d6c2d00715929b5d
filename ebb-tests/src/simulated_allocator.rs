//! Deterministic stand-in for the allocation engine.
//!
//! Each reroute round:
//! 1. Moves every started copy whose node says it cannot remain to the first
//!    node (in id order) the chain answers YES for
//! 2. Places unassigned copies, primaries first; a replica waits until its
//!    primary is active
//!
//! THROTTLE and NO both leave a copy where it is. Recoveries finish only when
//! `start_recoveries` is called, so tests can observe in-flight relocations.

use std::sync::Arc;

use ebb_cluster::{
    AllocationDeciders, ClusterResult, ClusterState, DecisionType, DiscoveryNode, RoutingAllocation,
    ShardRouting, ShardRoutingState,
};
use ebb_core::{AllocationId, NodeId};
use tracing::debug;

/// Moves and places shards according to a decider chain.
#[derive(Debug, Clone)]
pub struct SimulatedAllocator {
    deciders: Arc<AllocationDeciders>,
}

impl SimulatedAllocator {
    /// Creates an allocator consulting `deciders`.
    #[must_use]
    pub const fn new(deciders: Arc<AllocationDeciders>) -> Self {
        Self { deciders }
    }

    /// Runs one reroute round.
    ///
    /// # Errors
    ///
    /// Returns an error if a routing transition fails, which indicates a bug.
    pub fn reroute(&self, state: &ClusterState) -> ClusterResult<ClusterState> {
        let mut state = state.clone();

        for (allocation_id, target) in self.planned_moves(&state) {
            // Earlier moves in this round may have filled the target.
            if let Some(copy) = state.routing().get(allocation_id) {
                if let Some(node) = state.nodes().get(&target) {
                    if !self.allows(&state, copy, node) {
                        continue;
                    }
                }
            }
            debug!(allocation_id = %allocation_id, target = %target, "relocating shard copy");
            state = state.update_routing(|routing| routing.relocate(allocation_id, target).map(|_| ()))?;
        }

        let unassigned: Vec<AllocationId> = state.routing().unassigned().map(|c| c.allocation_id).collect();
        for allocation_id in unassigned {
            let Some(copy) = state.routing().get(allocation_id) else {
                continue;
            };
            if !copy.primary {
                let primary_active = state
                    .routing()
                    .primary_of(&copy.shard_id)
                    .is_some_and(|p| p.state.is_active());
                if !primary_active {
                    continue;
                }
            }
            let target = state
                .nodes()
                .iter()
                .find(|node| self.allows(&state, copy, node))
                .map(|node| node.id.clone());
            if let Some(target) = target {
                debug!(allocation_id = %allocation_id, target = %target, "allocating shard copy");
                state = state.update_routing(|routing| routing.initialize(allocation_id, target))?;
            }
        }

        Ok(state)
    }

    /// Finishes every recovery in flight.
    ///
    /// # Errors
    ///
    /// Returns an error if a routing transition fails, which indicates a bug.
    pub fn start_recoveries(state: &ClusterState) -> ClusterResult<ClusterState> {
        let initializing: Vec<AllocationId> = state
            .routing()
            .iter()
            .filter(|c| c.state == ShardRoutingState::Initializing)
            .map(|c| c.allocation_id)
            .collect();
        if initializing.is_empty() {
            return Ok(state.clone());
        }
        state.update_routing(|routing| {
            for allocation_id in initializing {
                routing.start(allocation_id)?;
            }
            Ok(())
        })
    }

    /// Alternates reroute and recovery until nothing changes.
    ///
    /// Returns the settled state and the number of rounds that changed something.
    ///
    /// # Errors
    ///
    /// Returns an error if a routing transition fails, which indicates a bug.
    pub fn settle(&self, state: &ClusterState, max_rounds: u32) -> ClusterResult<(ClusterState, u32)> {
        let mut state = state.clone();
        for round in 0..max_rounds {
            let next = Self::start_recoveries(&self.reroute(&state)?)?;
            if next == state {
                return Ok((state, round));
            }
            state = next;
        }
        Ok((state, max_rounds))
    }

    fn allows(&self, state: &ClusterState, copy: &ShardRouting, node: &DiscoveryNode) -> bool {
        let outcome = self
            .deciders
            .can_allocate(copy, node, &RoutingAllocation::new(state));
        outcome.decision_type == DecisionType::Yes
    }

    fn planned_moves(&self, state: &ClusterState) -> Vec<(AllocationId, NodeId)> {
        let allocation = RoutingAllocation::new(state);
        let mut moves = Vec::new();
        for node in state.nodes().iter() {
            for copy in state.routing().shards_on_node(&node.id) {
                if copy.state != ShardRoutingState::Started {
                    continue;
                }
                if self.deciders.can_remain(copy, node, &allocation).allows() {
                    continue;
                }
                let target = state
                    .nodes()
                    .iter()
                    .filter(|candidate| candidate.id != node.id)
                    .find(|candidate| self.allows(state, copy, candidate));
                if let Some(target) = target {
                    moves.push((copy.allocation_id, target.id.clone()));
                }
            }
        }
        moves
    }
}

#[cfg(test)]
mod tests {
    use ebb_cluster::{DiscoveryNodes, IndexMetadata, Metadata, RoutingTable};
    use ebb_core::Limits;
    use ebb_shutdown::shutdown_aware_deciders;

    use super::*;

    fn allocator() -> SimulatedAllocator {
        SimulatedAllocator::new(Arc::new(shutdown_aware_deciders(&Limits::new())))
    }

    #[test]
    fn test_settle_places_primaries_and_replicas() {
        let state = ClusterState::new(
            DiscoveryNodes::from_nodes([DiscoveryNode::data("a", "node-a"), DiscoveryNode::data("b", "node-b")])
                .unwrap(),
            RoutingTable::new(),
            Metadata::new(),
        )
        .with_index(IndexMetadata::new("logs", 2, 1))
        .unwrap();

        let (state, rounds) = allocator().settle(&state, 16).unwrap();

        assert!(rounds > 0);
        assert_eq!(state.routing().unassigned().count(), 0);
        assert!(state
            .routing()
            .iter()
            .all(|c| c.state == ShardRoutingState::Started));
        for shard in 0..2 {
            let nodes: Vec<_> = state
                .routing()
                .copies_of(&ebb_core::ShardId::new("logs", shard))
                .filter_map(|c| c.current_node.clone())
                .collect();
            assert_eq!(nodes.len(), 2);
            assert_ne!(nodes[0], nodes[1]);
        }
    }

    #[test]
    fn test_replica_waits_for_primary() {
        let state = ClusterState::new(
            DiscoveryNodes::from_nodes([DiscoveryNode::data("a", "node-a"), DiscoveryNode::data("b", "node-b")])
                .unwrap(),
            RoutingTable::new(),
            Metadata::new(),
        )
        .with_index(IndexMetadata::new("logs", 1, 1))
        .unwrap();

        let state = allocator().reroute(&state).unwrap();
        let replica = state
            .routing()
            .iter()
            .find(|c| !c.primary)
            .unwrap();
        assert_eq!(replica.state, ShardRoutingState::Unassigned);
        assert_eq!(state.routing().primary_of(&replica.shard_id).unwrap().state, ShardRoutingState::Initializing);
    }
}
