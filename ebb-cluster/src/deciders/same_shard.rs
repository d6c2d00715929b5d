use crate::decider::{AllocationDecider, Decision, RoutingAllocation};
use crate::node::DiscoveryNode;
use crate::shard_routing::ShardRouting;

const NAME: &str = "same_shard";

/// Forbids two copies of one shard on the same node.
#[derive(Debug, Default, Clone, Copy)]
pub struct SameShardAllocationDecider;

impl AllocationDecider for SameShardAllocationDecider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn can_allocate(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Option<Decision> {
        let occupied = allocation
            .routing()
            .copies_of(&shard.shard_id)
            .any(|c| c.allocation_id != shard.allocation_id && c.is_on(&node.id));
        if occupied {
            Some(Decision::no(
                NAME,
                format!(
                    "a copy of shard {} is already allocated to node [{}]",
                    shard.shard_id, node.id
                ),
            ))
        } else {
            Some(Decision::yes(NAME, "this node does not hold a copy of the shard"))
        }
    }
}
