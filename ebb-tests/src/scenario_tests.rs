//! Shutdown scenarios walked step by step.
//!
//! Each test builds a small cluster, registers a shutdown, and drives the
//! simulated allocator one round at a time, checking the published status
//! between rounds.

#![allow(clippy::too_many_lines)] // Scenario walkthroughs read top to bottom
#![allow(clippy::doc_markdown)] // Backticks in docs not critical for tests
#![allow(clippy::uninlined_format_args)] // Format string style not critical for tests

use ebb_cluster::{
    AllocationFilter, DecisionType, DiscoveryNode, IndexMetadata, RoutingAllocation, ShardRoutingState,
};
use ebb_core::{Limits, NodeId};
use ebb_shutdown::{PutShutdownRequest, ShardMigrationState};

use crate::properties::PropertyChecker;
use crate::scenarios::{clusters, TestCluster};

fn assert_no_violations(cluster: &TestCluster) {
    let mut checker = PropertyChecker::new(cluster.computer().clone());
    let violations = checker.check_all(&cluster.state());
    assert!(
        violations.is_empty(),
        "property violations: {}",
        violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    );
}

// ============================================================================
// REMOVE
// ============================================================================

#[test]
fn test_remove_single_node_stalls_until_capacity_joins() {
    let mut cluster = TestCluster::new(&[("a", "node-a")]).unwrap();
    cluster.create_index(IndexMetadata::new("logs", 1, 0)).unwrap();
    cluster.settle().unwrap();
    assert_eq!(cluster.shards_on("a").len(), 1);

    cluster
        .put_shutdown(&PutShutdownRequest::remove("a", "decommission"))
        .unwrap();
    let status = cluster.status("a").unwrap();
    assert_eq!(status.status, ShardMigrationState::Stalled);
    assert_eq!(status.shards_remaining, 1);
    assert_eq!(
        status.explanation,
        vec!["shard [logs][0] (primary) cannot move: no eligible node exists".to_string()]
    );

    cluster.join(DiscoveryNode::data("b", "node-b")).unwrap();
    assert_eq!(cluster.status("a").unwrap().status, ShardMigrationState::InProgress);

    cluster.reroute().unwrap();
    let moving = cluster.shards_on("a");
    assert_eq!(moving[0].state, ShardRoutingState::Relocating);
    assert_eq!(moving[0].relocating_node, Some(NodeId::new("b")));
    let status = cluster.status("a").unwrap();
    assert_eq!(status.status, ShardMigrationState::InProgress);
    assert_eq!(status.shards_remaining, 1);
    assert_no_violations(&cluster);

    cluster.start_recoveries().unwrap();
    let status = cluster.status("a").unwrap();
    assert_eq!(status.status, ShardMigrationState::Complete);
    assert_eq!(status.shards_remaining, 0);
    assert!(cluster.shards_on("a").is_empty());
    assert_eq!(cluster.shards_on("b").len(), 1);
}

#[test]
fn test_remove_master_only_node_is_complete_immediately() {
    let mut cluster = TestCluster::with_nodes(
        [DiscoveryNode::data("a", "node-a"), DiscoveryNode::master_only("m", "master-1")],
        Limits::new(),
    )
    .unwrap();
    cluster.create_index(IndexMetadata::new("logs", 2, 0)).unwrap();
    cluster.settle().unwrap();

    cluster
        .put_shutdown(&PutShutdownRequest::remove("m", "retire master"))
        .unwrap();

    let status = cluster.status("m").unwrap();
    assert_eq!(status.status, ShardMigrationState::Complete);
    assert_eq!(status.shards_remaining, 0);
    assert!(status.explanation.is_empty());
}

#[test]
fn test_remove_not_stalled_when_every_shard_has_a_copy_elsewhere() {
    let mut cluster = TestCluster::new(clusters::TWO_NODE).unwrap();
    cluster.create_index(IndexMetadata::new("logs", 1, 1)).unwrap();
    cluster.settle().unwrap();
    assert_eq!(cluster.shards_on("a").len(), 1);
    assert_eq!(cluster.shards_on("b").len(), 1);

    cluster
        .put_shutdown(&PutShutdownRequest::remove("a", "decommission"))
        .unwrap();

    let status = cluster.status("a").unwrap();
    assert_eq!(status.status, ShardMigrationState::Complete);
    assert_eq!(status.shards_remaining, 0);
    assert_eq!(
        status.explanation,
        vec![
            "[1] shards cannot be moved away from this node but have at least one copy on another node in the cluster"
                .to_string()
        ]
    );
}

#[test]
fn test_remove_stalled_when_the_other_copy_is_also_vacating() {
    let mut cluster = TestCluster::new(clusters::TWO_NODE).unwrap();
    cluster.create_index(IndexMetadata::new("logs", 1, 1)).unwrap();
    cluster.settle().unwrap();

    cluster
        .put_shutdown(&PutShutdownRequest::remove("a", "decommission"))
        .unwrap();
    cluster
        .put_shutdown(&PutShutdownRequest::remove("b", "decommission"))
        .unwrap();

    for node in ["a", "b"] {
        let status = cluster.status(node).unwrap();
        assert_eq!(status.status, ShardMigrationState::Stalled, "node {node}");
        assert_eq!(status.shards_remaining, 1);
    }
}

#[test]
fn test_remove_stalled_by_filter_names_the_veto() {
    let mut cluster = TestCluster::new(clusters::TWO_NODE).unwrap();
    cluster
        .create_index(IndexMetadata::new("pinned", 1, 0).with_filter(AllocationFilter::require_name("node-a")))
        .unwrap();
    cluster.settle().unwrap();
    assert_eq!(cluster.shards_on("a").len(), 1);

    cluster
        .put_shutdown(&PutShutdownRequest::remove("a", "decommission"))
        .unwrap();
    cluster.settle().unwrap();

    let status = cluster.status("a").unwrap();
    assert_eq!(status.status, ShardMigrationState::Stalled);
    assert_eq!(
        status.explanation,
        vec![
            "shard [pinned][0] (primary) cannot move: node [b]: [filter] node [node-b] does not match index setting \
             [index.routing.allocation.require._name:[node-a]]"
                .to_string()
        ]
    );
    assert_eq!(cluster.shards_on("a").len(), 1);
}

#[test]
fn test_remove_throttled_moves_are_in_progress() {
    let limits = Limits {
        max_incoming_recoveries_per_node: 1,
        ..Limits::new()
    };
    let mut cluster = TestCluster::with_nodes([DiscoveryNode::data("a", "node-a")], limits).unwrap();
    cluster.create_index(IndexMetadata::new("logs", 3, 0)).unwrap();
    cluster.settle().unwrap();
    assert_eq!(cluster.shards_on("a").len(), 3);

    cluster.join(DiscoveryNode::data("b", "node-b")).unwrap();
    cluster
        .put_shutdown(&PutShutdownRequest::remove("a", "decommission"))
        .unwrap();
    cluster.reroute().unwrap();

    let relocating = cluster
        .shards_on("a")
        .iter()
        .filter(|c| c.state == ShardRoutingState::Relocating)
        .count();
    assert_eq!(relocating, 1);
    let status = cluster.status("a").unwrap();
    assert_eq!(status.status, ShardMigrationState::InProgress);
    assert_eq!(status.shards_remaining, 3);
    assert!(status.explanation.is_empty());

    let rounds = cluster.settle().unwrap();
    assert!(rounds >= 2);
    assert_eq!(cluster.status("a").unwrap().status, ShardMigrationState::Complete);
    assert_eq!(cluster.shards_on("b").len(), 3);
}

#[test]
fn test_remove_complete_after_node_leaves() {
    let mut cluster = TestCluster::new(clusters::TWO_NODE).unwrap();
    cluster
        .create_index(IndexMetadata::new("pinned", 1, 0).with_filter(AllocationFilter::require_name("node-a")))
        .unwrap();
    cluster.settle().unwrap();
    cluster
        .put_shutdown(&PutShutdownRequest::remove("a", "decommission"))
        .unwrap();
    assert_eq!(cluster.status("a").unwrap().status, ShardMigrationState::Stalled);

    cluster.leave("a").unwrap();

    let status = cluster.status("a").unwrap();
    assert_eq!(status.status, ShardMigrationState::Complete);
    assert_eq!(cluster.state().routing().unassigned().count(), 1);
}

#[test]
fn test_initializing_copies_report_not_started() {
    let mut cluster = TestCluster::new(clusters::TWO_NODE).unwrap();
    cluster.create_index(IndexMetadata::new("logs", 1, 0)).unwrap();
    cluster.reroute().unwrap();
    assert_eq!(cluster.shards_on("a")[0].state, ShardRoutingState::Initializing);

    cluster
        .put_shutdown(&PutShutdownRequest::remove("a", "decommission"))
        .unwrap();

    let status = cluster.status("a").unwrap();
    assert_eq!(status.status, ShardMigrationState::NotStarted);
    assert_eq!(status.shards_remaining, 1);
}

// ============================================================================
// RESTART
// ============================================================================

#[test]
fn test_restart_does_not_move_data() {
    let mut cluster = TestCluster::new(clusters::TWO_NODE).unwrap();
    cluster.create_index(IndexMetadata::new("logs", 2, 0)).unwrap();
    cluster.settle().unwrap();
    let before: Vec<_> = cluster.shards_on("a");

    cluster
        .put_shutdown(&PutShutdownRequest::restart("a", "kernel upgrade"))
        .unwrap();
    cluster.settle().unwrap();

    assert_eq!(cluster.shards_on("a"), before);
    assert!(cluster.status("a").is_some());
}

// ============================================================================
// REPLACE
// ============================================================================

#[test]
fn test_replace_target_offline_then_joins() {
    let mut cluster = TestCluster::new(&[("a", "node-a"), ("c", "node-c")]).unwrap();
    cluster.create_index(IndexMetadata::new("old", 2, 0)).unwrap();
    cluster.settle().unwrap();
    assert_eq!(cluster.shards_on("a").len(), 2);

    cluster
        .put_shutdown(&PutShutdownRequest::replace("a", "node-b", "hardware refresh"))
        .unwrap();
    let status = cluster.status("a").unwrap();
    assert_eq!(status.status, ShardMigrationState::Stalled);
    assert_eq!(status.shards_remaining, 2);
    assert_eq!(
        status.explanation[0],
        "shard [old][0] (primary) cannot move: replacement target [node-b] has not joined the cluster"
    );

    // Nothing may leave for a node other than the target.
    cluster.settle().unwrap();
    assert_eq!(cluster.shards_on("a").len(), 2);
    assert!(cluster.shards_on("c").is_empty());

    cluster.join(DiscoveryNode::data("b", "node-b")).unwrap();
    assert_eq!(cluster.status("a").unwrap().status, ShardMigrationState::InProgress);

    cluster.create_index(IndexMetadata::new("fresh", 1, 1)).unwrap();
    cluster.reroute().unwrap();
    assert_no_violations(&cluster);
    assert_eq!(cluster.status("a").unwrap().status, ShardMigrationState::InProgress);

    cluster.settle().unwrap();
    assert_no_violations(&cluster);
    assert_eq!(cluster.status("a").unwrap().status, ShardMigrationState::Complete);
    let on_b: Vec<_> = cluster.shards_on("b").iter().map(|c| c.shard_id.index.clone()).collect();
    assert_eq!(on_b.len(), 2);
    assert!(on_b.iter().all(|index| index.as_str() == "old"));

    // The fresh replica has nowhere to go: a is vacating, b is reserved and c
    // holds the primary.
    let state = cluster.state();
    let replica = state
        .routing()
        .iter()
        .find(|c| !c.primary && c.shard_id.index.as_str() == "fresh")
        .unwrap();
    assert_eq!(replica.state, ShardRoutingState::Unassigned);
    let b = state.nodes().get(&NodeId::new("b")).unwrap();
    let outcome = cluster
        .computer()
        .deciders()
        .can_allocate(replica, b, &RoutingAllocation::new(&state));
    assert_eq!(outcome.decision_type, DecisionType::No);
    let veto = outcome.vetoes().next().unwrap();
    assert_eq!(veto.decider, "node_replacement");
    assert_eq!(
        veto.explanation,
        "node [node-b] is replacing the vacating node [a], only data currently allocated to the source node \
         may be allocated to it until the replacement is complete"
    );
}

#[test]
fn test_replace_overrides_filter_pinning_to_source() {
    let mut cluster = TestCluster::new(&[("a", "node-a"), ("c", "node-c")]).unwrap();
    cluster
        .create_index(IndexMetadata::new("pinned", 1, 0).with_filter(AllocationFilter::require_name("node-a")))
        .unwrap();
    cluster.settle().unwrap();

    cluster
        .put_shutdown(&PutShutdownRequest::replace("a", "node-b", "hardware refresh"))
        .unwrap();
    cluster.join(DiscoveryNode::data("b", "node-b")).unwrap();

    let state = cluster.state();
    let shard = cluster.shards_on("a").remove(0);
    let b = state.nodes().get(&NodeId::new("b")).unwrap();
    let outcome = cluster
        .computer()
        .deciders()
        .can_allocate(&shard, b, &RoutingAllocation::new(&state));
    assert_eq!(outcome.decision_type, DecisionType::Yes);
    let filter = outcome.decisions.iter().find(|d| d.decider == "filter").unwrap();
    assert_eq!(filter.decision_type, DecisionType::Yes);
    assert!(filter
        .explanation
        .contains("(overridden: node [node-b] is replacing node [a], and may receive shards from it)"));

    // The same shard may not go anywhere else.
    let c = state.nodes().get(&NodeId::new("c")).unwrap();
    let outcome = cluster
        .computer()
        .deciders()
        .can_allocate(&shard, c, &RoutingAllocation::new(&state));
    assert_eq!(outcome.decision_type, DecisionType::No);
    assert_eq!(outcome.vetoes().next().unwrap().decider, "node_shutdown");

    cluster.settle().unwrap();
    assert_eq!(cluster.status("a").unwrap().status, ShardMigrationState::Complete);
    assert_eq!(cluster.shards_on("b").len(), 1);
}

#[test]
fn test_replace_replica_allocates_after_record_deleted() {
    let mut cluster = TestCluster::new(&[("a", "node-a"), ("c", "node-c")]).unwrap();
    cluster
        .put_shutdown(&PutShutdownRequest::replace("a", "node-b", "hardware refresh"))
        .unwrap();
    cluster.join(DiscoveryNode::data("b", "node-b")).unwrap();

    cluster.create_index(IndexMetadata::new("fresh", 1, 2)).unwrap();
    cluster.settle().unwrap();
    assert_eq!(cluster.shards_on("c").len(), 1);
    assert!(cluster.shards_on("a").is_empty());
    assert!(cluster.shards_on("b").is_empty());
    assert_eq!(cluster.state().routing().unassigned().count(), 2);
    assert_eq!(cluster.status("a").unwrap().status, ShardMigrationState::Complete);
    assert_no_violations(&cluster);

    assert!(cluster.delete_shutdown("a"));
    cluster.settle().unwrap();

    assert_eq!(cluster.state().routing().unassigned().count(), 0);
    assert_eq!(cluster.shards_on("a").len(), 1);
    assert_eq!(cluster.shards_on("b").len(), 1);
    assert!(cluster.status("a").is_none());
}

#[test]
fn test_replace_target_restart_rebuilds_replica_with_record_present() {
    let mut cluster = TestCluster::new(&[("a", "node-a")]).unwrap();
    cluster.create_index(IndexMetadata::new("myindex", 1, 1)).unwrap();
    cluster.settle().unwrap();
    cluster.join(DiscoveryNode::data("b", "node-b")).unwrap();
    cluster.settle().unwrap();
    assert_eq!(cluster.shards_on("a").len(), 1);
    assert_eq!(cluster.shards_on("b").len(), 1);

    cluster.join(DiscoveryNode::data("c", "node-c")).unwrap();
    cluster
        .put_shutdown(&PutShutdownRequest::replace("a", "node-c", "testing"))
        .unwrap();
    cluster.settle().unwrap();
    assert_eq!(cluster.status("a").unwrap().status, ShardMigrationState::Complete);
    assert!(cluster.shards_on("c").iter().all(|c| c.primary));

    // The replaced node is terminated, then the target restarts: the copy on
    // b is promoted and the lost copy is unassigned until c is back.
    cluster.leave("a").unwrap();
    cluster.leave("c").unwrap();
    cluster.settle().unwrap();
    assert_eq!(cluster.state().routing().unassigned().count(), 1);
    assert!(cluster.shards_on("b").iter().all(|c| c.primary));

    cluster.join(DiscoveryNode::data("c", "node-c")).unwrap();
    assert_no_violations(&cluster);
    cluster.settle().unwrap();
    assert_no_violations(&cluster);

    assert_eq!(cluster.state().routing().unassigned().count(), 0);
    let on_c = cluster.shards_on("c");
    assert_eq!(on_c.len(), 1);
    assert!(!on_c[0].primary);
    assert_eq!(on_c[0].state, ShardRoutingState::Started);
    assert!(cluster.state().shutdowns().contains(&NodeId::new("a")));
    assert_eq!(cluster.status("a").unwrap().status, ShardMigrationState::Complete);
}

#[test]
fn test_replace_target_named_after_an_existing_member() {
    let mut cluster = TestCluster::new(clusters::THREE_NODE).unwrap();
    cluster
        .create_index(IndexMetadata::new("pinned", 1, 0).with_filter(AllocationFilter::require_name("node-a")))
        .unwrap();
    cluster.settle().unwrap();

    cluster
        .put_shutdown(&PutShutdownRequest::replace("a", "node-c", "consolidate"))
        .unwrap();
    assert_eq!(cluster.status("a").unwrap().status, ShardMigrationState::InProgress);

    cluster.settle().unwrap();
    assert_eq!(cluster.shards_on("c").len(), 1);
    assert!(cluster.shards_on("b").is_empty());
    assert_eq!(cluster.status("a").unwrap().status, ShardMigrationState::Complete);
}

#[test]
fn test_self_replacement_is_rejected() {
    let mut cluster = TestCluster::new(clusters::TWO_NODE).unwrap();
    let err = cluster
        .put_shutdown(&PutShutdownRequest::replace("a", "node-a", "oops"))
        .unwrap_err();
    assert!(err.to_string().contains("invalid shutdown request"));
    assert!(cluster.status("a").is_none());
}

// ============================================================================
// Record lifecycle
// ============================================================================

#[test]
fn test_delete_and_reregister_starts_fresh() {
    let mut cluster = TestCluster::new(&[("a", "node-a")]).unwrap();
    cluster.create_index(IndexMetadata::new("logs", 1, 0)).unwrap();
    cluster.settle().unwrap();

    cluster
        .put_shutdown(&PutShutdownRequest::remove("a", "first attempt"))
        .unwrap();
    let first = cluster.status("a").unwrap();
    assert_eq!(first.status, ShardMigrationState::Stalled);

    assert!(cluster.delete_shutdown("a"));
    assert!(cluster.status("a").is_none());
    assert!(!cluster.delete_shutdown("a"));

    cluster.join(DiscoveryNode::data("b", "node-b")).unwrap();
    cluster
        .put_shutdown(&PutShutdownRequest::remove("a", "second attempt"))
        .unwrap();
    let second = cluster.status("a").unwrap();
    assert_eq!(second.status, ShardMigrationState::InProgress);
    assert!(second.explanation.is_empty());
}

#[test]
fn test_overwrite_changes_type_in_place() {
    let mut cluster = TestCluster::new(clusters::TWO_NODE).unwrap();
    cluster.create_index(IndexMetadata::new("logs", 1, 0)).unwrap();
    cluster.settle().unwrap();

    cluster
        .put_shutdown(&PutShutdownRequest::restart("a", "kernel upgrade"))
        .unwrap();
    cluster.settle().unwrap();
    assert_eq!(cluster.shards_on("a").len(), 1);

    cluster
        .put_shutdown(&PutShutdownRequest::remove("a", "hardware failure"))
        .unwrap();
    assert_eq!(cluster.state().shutdowns().len(), 1);
    cluster.settle().unwrap();
    assert!(cluster.shards_on("a").is_empty());
    assert_eq!(cluster.status("a").unwrap().status, ShardMigrationState::Complete);
}

#[test]
fn test_status_table_serializes_for_operators() {
    let mut cluster = TestCluster::new(&[("a", "node-a")]).unwrap();
    cluster.create_index(IndexMetadata::new("logs", 1, 0)).unwrap();
    cluster.settle().unwrap();
    cluster
        .put_shutdown(&PutShutdownRequest::remove("a", "decommission"))
        .unwrap();

    let table = cluster.status_table();
    assert_eq!(table.version, cluster.state().version());
    let json = serde_json::to_value(&*table).unwrap();
    assert_eq!(json["statuses"]["a"]["status"], "STALLED");
    assert_eq!(json["statuses"]["a"]["shards_remaining"], 1);
}
