//! Shutdown lifecycles through the coordinator and the service.
//!
//! These tests run the real `ClusterHandle` actor. Allocation is driven by
//! submitting the simulated allocator's reroute as an ordinary update task, the
//! same way an allocation service would publish its results.

#![allow(clippy::doc_markdown)] // Backticks in docs not critical for tests

use std::sync::Arc;

use ebb_cluster::{
    spawn_cluster_coordinator, ClusterHandle, ClusterState, DiscoveryNode, DiscoveryNodes, IndexMetadata, Metadata,
    RoutingSnapshotSource, RoutingTable, ShutdownType,
};
use ebb_core::{Limits, NodeId};
use ebb_shutdown::{
    shutdown_aware_deciders, DeleteShutdownRequest, GetShutdownStatusRequest, PutShutdownRequest,
    ShardMigrationState, ShutdownError, ShutdownService,
};

use crate::scenarios::MAX_SETTLE_ROUNDS;
use crate::simulated_allocator::SimulatedAllocator;

fn cluster(nodes: &[(&str, &str)], limits: &Limits) -> ClusterHandle {
    let nodes = DiscoveryNodes::from_nodes(nodes.iter().map(|(id, name)| DiscoveryNode::data(*id, *name))).unwrap();
    spawn_cluster_coordinator(ClusterState::new(nodes, RoutingTable::new(), Metadata::new()), limits)
}

async fn settle(handle: &ClusterHandle, limits: &Limits) {
    let allocator = SimulatedAllocator::new(Arc::new(shutdown_aware_deciders(limits)));
    handle
        .update("reroute", move |state| {
            allocator
                .settle(state, MAX_SETTLE_ROUNDS)
                .map(|(settled, _)| settled)
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_replace_lifecycle_through_service() {
    let limits = Limits::new();
    let handle = cluster(&[("a", "node-a"), ("c", "node-c")], &limits);
    handle
        .update("create-index", |state| state.with_index(IndexMetadata::new("old", 2, 0)))
        .await
        .unwrap();
    settle(&handle, &limits).await;

    let service = ShutdownService::new(handle.clone(), limits);
    let mut statuses = service.publish_statuses().await.unwrap();

    service
        .put_shutdown(PutShutdownRequest::replace("a", "node-b", "hardware refresh"), 1_000)
        .await
        .unwrap();
    let response = service.get_status(&GetShutdownStatusRequest::node("a"));
    assert_eq!(response.shutdown_statuses.len(), 1);
    let status = &response.shutdown_statuses[0];
    assert_eq!(status.shutdown_type, ShutdownType::Replace);
    assert_eq!(status.registered_at_us, 1_000);
    assert_eq!(status.migration_status.status, ShardMigrationState::Stalled);
    assert_eq!(
        statuses.borrow_and_update().get(&NodeId::new("a")).unwrap().status,
        ShardMigrationState::Stalled
    );

    handle
        .update("node-join", |state| state.with_node_joined(DiscoveryNode::data("b", "node-b")))
        .await
        .unwrap();
    assert!(statuses.has_changed().unwrap());
    assert_eq!(
        statuses.borrow_and_update().get(&NodeId::new("a")).unwrap().status,
        ShardMigrationState::InProgress
    );

    settle(&handle, &limits).await;
    let table = Arc::clone(&statuses.borrow_and_update());
    assert_eq!(table.version, handle.current().version());
    assert_eq!(table.get(&NodeId::new("a")).unwrap().status, ShardMigrationState::Complete);
    assert_eq!(handle.current().routing().shard_count_on_node(&NodeId::new("b")), 2);

    service.delete_shutdown(DeleteShutdownRequest::new("a")).await.unwrap();
    assert!(service
        .get_status(&GetShutdownStatusRequest::all())
        .shutdown_statuses
        .is_empty());
    assert!(statuses.borrow().statuses.is_empty());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_puts_for_one_node_keep_one_record() {
    let limits = Limits::new();
    let handle = cluster(&[("a", "node-a"), ("b", "node-b")], &limits);
    let service = Arc::new(ShutdownService::new(handle.clone(), limits));

    let tasks: Vec<_> = (0..8_u64)
        .map(|i| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                let request = if i % 2 == 0 {
                    PutShutdownRequest::remove("a", format!("attempt {i}"))
                } else {
                    PutShutdownRequest::restart("a", format!("attempt {i}"))
                };
                service.put_shutdown(request, 100 + i).await
            })
        })
        .collect();
    for task in tasks {
        assert!(task.await.unwrap().unwrap().acknowledged);
    }

    let state = handle.current();
    assert_eq!(state.shutdowns().len(), 1);
    let record = state.shutdowns().get(&NodeId::new("a")).unwrap();
    assert!(record.reason().starts_with("attempt "));
    assert!(record.registered_at_us() >= 100);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_puts_respect_record_limit() {
    let limits = Limits {
        max_shutdown_records: 3,
        ..Limits::new()
    };
    let nodes: Vec<(String, String)> = (0..6).map(|i| (format!("n{i}"), format!("node-{i}"))).collect();
    let refs: Vec<(&str, &str)> = nodes.iter().map(|(id, name)| (id.as_str(), name.as_str())).collect();
    let handle = cluster(&refs, &limits);
    let service = Arc::new(ShutdownService::new(handle.clone(), limits));

    let tasks: Vec<_> = nodes
        .iter()
        .map(|(id, _)| {
            let service = Arc::clone(&service);
            let request = PutShutdownRequest::remove(id.as_str(), "scale down");
            tokio::spawn(async move { service.put_shutdown(request, 1).await })
        })
        .collect();

    let mut accepted = 0;
    let mut rejected = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(ShutdownError::TooManyRecords { max, .. }) => {
                assert_eq!(max, 3);
                rejected += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(accepted, 3);
    assert_eq!(rejected, 3);
    assert_eq!(handle.current().shutdowns().len(), 3);

    // Overwriting an existing record is allowed at the limit.
    let existing = handle.current().shutdowns().iter().next().unwrap().node_id().clone();
    service
        .put_shutdown(PutShutdownRequest::restart(existing, "changed my mind"), 2)
        .await
        .unwrap();
    assert_eq!(handle.current().shutdowns().len(), 3);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_rejected_put_leaves_state_untouched() {
    let limits = Limits {
        max_reason_bytes: 8,
        ..Limits::new()
    };
    let handle = cluster(&[("a", "node-a"), ("b", "node-b")], &limits);
    let service = ShutdownService::new(handle.clone(), limits);
    let before = handle.current().version();

    let err = service
        .put_shutdown(PutShutdownRequest::remove("a", "this reason is far too long"), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, ShutdownError::ReasonTooLong { max: 8, .. }));

    let err = service
        .put_shutdown(PutShutdownRequest::replace("a", "node-a", "self"), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, ShutdownError::InvalidRecord(_)));

    assert_eq!(handle.current().version(), before);
    assert!(handle.current().shutdowns().is_empty());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_registration_timestamps_never_go_backwards() {
    let limits = Limits::new();
    let handle = cluster(&[("a", "node-a"), ("b", "node-b")], &limits);
    let service = ShutdownService::new(handle.clone(), limits);

    service
        .put_shutdown(PutShutdownRequest::remove("a", "first"), 5_000)
        .await
        .unwrap();
    // A put stamped by a lagging clock.
    service
        .put_shutdown(PutShutdownRequest::restart("b", "second"), 4_000)
        .await
        .unwrap();

    let state = handle.current();
    let a = state.shutdowns().get(&NodeId::new("a")).unwrap().registered_at_us();
    let b = state.shutdowns().get(&NodeId::new("b")).unwrap().registered_at_us();
    assert_eq!(a, 5_000);
    assert!(b >= a);

    let response = service.get_status(&GetShutdownStatusRequest::all());
    let ids: Vec<&str> = response
        .shutdown_statuses
        .iter()
        .map(|s| s.node_id.as_str())
        .collect();
    assert_eq!(ids, ["a", "b"]);
    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["shutdown_statuses"][1]["type"], "RESTART");
    assert_eq!(
        json["shutdown_statuses"][1]["allocation_delay_us"],
        limits.default_restart_allocation_delay_us
    );

    handle.shutdown().await;
}
