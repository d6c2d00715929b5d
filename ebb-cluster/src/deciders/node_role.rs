use crate::decider::{AllocationDecider, Decision, RoutingAllocation};
use crate::node::DiscoveryNode;
use crate::shard_routing::ShardRouting;

const NAME: &str = "node_role";

/// Keeps shards off nodes without the data role.
#[derive(Debug, Default, Clone, Copy)]
pub struct NodeRoleAllocationDecider;

fn decide(node: &DiscoveryNode) -> Option<Decision> {
    if node.is_data_node() {
        None
    } else {
        Some(Decision::no(
            NAME,
            format!("node [{}] does not hold the data role", node.id),
        ))
    }
}

impl AllocationDecider for NodeRoleAllocationDecider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn can_allocate(
        &self,
        _shard: &ShardRouting,
        node: &DiscoveryNode,
        _allocation: &RoutingAllocation<'_>,
    ) -> Option<Decision> {
        decide(node)
    }

    fn can_remain(
        &self,
        _shard: &ShardRouting,
        node: &DiscoveryNode,
        _allocation: &RoutingAllocation<'_>,
    ) -> Option<Decision> {
        decide(node)
    }
}
