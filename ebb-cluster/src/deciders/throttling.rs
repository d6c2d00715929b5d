use ebb_core::Limits;

use crate::decider::{AllocationDecider, Decision, RoutingAllocation};
use crate::node::DiscoveryNode;
use crate::shard_routing::ShardRouting;

const NAME: &str = "throttling";

/// Bounds the number of concurrent recoveries onto one node.
#[derive(Debug, Clone, Copy)]
pub struct ThrottlingAllocationDecider {
    max_incoming: u32,
}

impl ThrottlingAllocationDecider {
    /// Creates a decider allowing `max_incoming` concurrent recoveries per node.
    ///
    /// # Panics
    ///
    /// Panics if `max_incoming` is zero.
    #[must_use]
    pub fn new(max_incoming: u32) -> Self {
        assert!(max_incoming > 0, "max_incoming must be positive");
        Self { max_incoming }
    }

    /// Creates a decider from configured limits.
    #[must_use]
    pub fn from_limits(limits: &Limits) -> Self {
        Self::new(limits.max_incoming_recoveries_per_node.max(1))
    }
}

impl AllocationDecider for ThrottlingAllocationDecider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn can_allocate(
        &self,
        _shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Option<Decision> {
        let incoming = allocation.routing().initializing_on_node(&node.id);
        if incoming >= self.max_incoming as usize {
            Some(Decision::throttle(
                NAME,
                format!(
                    "node [{}] reached the limit of incoming shard recoveries [{}]",
                    node.id, self.max_incoming
                ),
            ))
        } else {
            Some(Decision::yes(NAME, "below the incoming shard recoveries limit"))
        }
    }
}

#[cfg(test)]
mod tests {
    use ebb_core::{AllocationId, NodeId};

    use super::*;
    use crate::decider::DecisionType;
    use crate::deciders::test_support::state_with;
    use crate::metadata::IndexMetadata;

    #[test]
    fn test_throttles_at_limit() {
        let state = state_with(vec![DiscoveryNode::data("a", "node-a")], IndexMetadata::new("logs", 2, 0));
        let state = state
            .update_routing(|routing| routing.initialize(AllocationId::new(1), NodeId::new("a")))
            .unwrap();
        let pending = state.routing().get(AllocationId::new(2)).unwrap();
        let node = DiscoveryNode::data("a", "node-a");
        let allocation = RoutingAllocation::new(&state);

        let relaxed = ThrottlingAllocationDecider::new(2)
            .can_allocate(pending, &node, &allocation)
            .unwrap();
        assert_eq!(relaxed.decision_type, DecisionType::Yes);

        let strict = ThrottlingAllocationDecider::new(1)
            .can_allocate(pending, &node, &allocation)
            .unwrap();
        assert_eq!(strict.decision_type, DecisionType::Throttle);
    }
}
