//! Replacement target exclusivity.
//!
//! While a REPLACE record is active, its target node only receives shards that
//! come from the vacating node. For those shards the decider also overrides
//! allocation filters, so an index pinned to the vacating node by name can
//! still follow it to the replacement.
//!
//! Once every node a target replaces has left the cluster, the target may also
//! receive unassigned copies. A replica lost when the target restarts can then
//! be rebuilt on it while the record is still in place.

use ebb_cluster::{
    AllocationDecider, Decision, DiscoveryNode, NodeRegistry, RoutingAllocation, ShardRouting,
    ShardRoutingState, ShutdownRecord,
};
use ebb_core::NodeId;

const NAME: &str = "node_replacement";

/// Restricts a replacement target to the data of the node it replaces.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReplacementAllocationDecider;

/// REPLACE records whose target resolves to `node`.
fn replacing<'a>(node: &DiscoveryNode, allocation: &RoutingAllocation<'a>) -> Vec<&'a ShutdownRecord> {
    let nodes = allocation.nodes();
    allocation
        .shutdowns()
        .replacements()
        .filter(|record| {
            record
                .target_node_name()
                .and_then(|name| nodes.resolve(name))
                .is_some_and(|target| *target == node.id)
        })
        .collect()
}

/// Returns true if `shard` is on `vacating` or is recovering from it.
pub(crate) fn originates_from(shard: &ShardRouting, vacating: &NodeId) -> bool {
    shard.is_on(vacating) || (shard.is_relocation_target() && shard.relocating_node.as_ref() == Some(vacating))
}

impl AllocationDecider for ReplacementAllocationDecider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn can_allocate(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Option<Decision> {
        let records = replacing(node, allocation);
        let first = records.first()?;
        if records.iter().any(|r| originates_from(shard, r.node_id())) {
            return None;
        }
        if shard.state == ShardRoutingState::Unassigned
            && records.iter().all(|r| !allocation.nodes().contains(r.node_id()))
        {
            return None;
        }
        Some(Decision::no(
            NAME,
            format!(
                "node [{}] is replacing the vacating node [{}], only data currently allocated to the source node may be allocated to it until the replacement is complete",
                node.name,
                first.node_id()
            ),
        ))
    }

    fn filter_override(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Option<String> {
        replacing(node, allocation)
            .into_iter()
            .find(|r| originates_from(shard, r.node_id()))
            .map(|r| {
                format!(
                    "node [{}] is replacing node [{}], and may receive shards from it",
                    node.name,
                    r.node_id()
                )
            })
    }
}
