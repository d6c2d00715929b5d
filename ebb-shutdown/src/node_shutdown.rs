//! Keeps shards off nodes that are leaving the cluster.

use ebb_cluster::{AllocationDecider, Decision, DiscoveryNode, RoutingAllocation, ShardRouting, ShutdownType};

use crate::replacement::originates_from;

const NAME: &str = "node_shutdown";

/// Rejects allocation onto REMOVE/REPLACE nodes and routes a replaced node's
/// shards only to its replacement.
///
/// RESTART records do not restrict allocation: the node keeps its data.
#[derive(Debug, Default, Clone, Copy)]
pub struct NodeShutdownAllocationDecider;

fn preparing_removal(node: &DiscoveryNode, allocation: &RoutingAllocation<'_>) -> Option<Decision> {
    allocation.shutdowns().is_vacating(&node.id).then(|| {
        Decision::no(
            NAME,
            format!("node [{}] is preparing to be removed from the cluster", node.id),
        )
    })
}

impl AllocationDecider for NodeShutdownAllocationDecider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn can_allocate(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Option<Decision> {
        if let Some(decision) = preparing_removal(node, allocation) {
            return Some(decision);
        }

        allocation
            .shutdowns()
            .replacements()
            .filter(|r| originates_from(shard, r.node_id()))
            .find_map(|r| {
                let target = r.target_node_name()?;
                (*target != node.name).then(|| {
                    Decision::no(
                        NAME,
                        format!(
                            "node [{}] is being replaced by [{target}], its shards may only be allocated to the replacement target",
                            r.node_id()
                        ),
                    )
                })
            })
    }

    fn can_remain(
        &self,
        _shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Option<Decision> {
        preparing_removal(node, allocation)
    }
}
