use std::sync::Arc;

use ebb_cluster::deciders::{
    FilterAllocationDecider, NodeRoleAllocationDecider, SameShardAllocationDecider,
    ThrottlingAllocationDecider,
};
use ebb_cluster::AllocationDeciders;
use ebb_core::Limits;

use crate::node_shutdown::NodeShutdownAllocationDecider;
use crate::replacement::ReplacementAllocationDecider;

/// Builds the decider chain used while shutdowns may be active.
///
/// Hard vetoes come first so the chain short-circuits before the
/// comparatively expensive per-shard checks.
#[must_use]
pub fn shutdown_aware_deciders(limits: &Limits) -> AllocationDeciders {
    AllocationDeciders::new(vec![
        Arc::new(NodeRoleAllocationDecider),
        Arc::new(NodeShutdownAllocationDecider),
        Arc::new(ReplacementAllocationDecider),
        Arc::new(SameShardAllocationDecider),
        Arc::new(FilterAllocationDecider),
        Arc::new(ThrottlingAllocationDecider::from_limits(limits)),
    ])
}
