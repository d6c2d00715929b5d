use crate::decider::{AllocationDecider, Decision, RoutingAllocation};
use crate::node::DiscoveryNode;
use crate::shard_routing::ShardRouting;

const NAME: &str = "filter";

/// Applies per-index `require`/`include`/`exclude` allocation filters.
///
/// This is a filter decider: its vetoes may be overridden by another decider
/// in the chain for specific (shard, node) pairs.
#[derive(Debug, Default, Clone, Copy)]
pub struct FilterAllocationDecider;

impl FilterAllocationDecider {
    fn decide(shard: &ShardRouting, node: &DiscoveryNode, allocation: &RoutingAllocation<'_>) -> Option<Decision> {
        let index = allocation.metadata().index(&shard.shard_id.index)?;
        match index.filter_violation(node) {
            Some(filter) => Some(Decision::no(
                NAME,
                format!(
                    "node [{}] does not match index setting [index.routing.allocation.{}]",
                    node.name,
                    filter.describe()
                ),
            )),
            None => Some(Decision::yes(NAME, "node passes index allocation filters")),
        }
    }
}

impl AllocationDecider for FilterAllocationDecider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn can_allocate(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Option<Decision> {
        Self::decide(shard, node, allocation)
    }

    fn can_remain(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Option<Decision> {
        Self::decide(shard, node, allocation)
    }

    fn is_filter(&self) -> bool {
        true
    }
}
