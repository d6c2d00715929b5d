//! Shutdown record storage.
//!
//! Records live in the cluster state metadata, so writes go through the
//! coordinator and are linearized with every other cluster update. Readers see
//! the records and the routing table of the same snapshot.

use async_trait::async_trait;
use ebb_cluster::{ClusterHandle, RoutingSnapshotSource, ShutdownRecord};
use ebb_core::{Limits, NodeId};

use crate::api::PutShutdownRequest;
use crate::error::{ShutdownError, ShutdownResult};
use crate::registration::prepare_record;

/// Durable map from node id to its active shutdown record.
#[async_trait]
pub trait ShutdownRecordStore: Send + Sync {
    /// Validates `request` against the latest state and stores the record,
    /// replacing any record for the same node.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails or the store is unavailable.
    async fn put(&self, request: PutShutdownRequest, now_us: u64, limits: Limits) -> ShutdownResult<ShutdownRecord>;

    /// Returns the active record of `node_id`.
    fn get(&self, node_id: &NodeId) -> Option<ShutdownRecord>;

    /// Removes the record of `node_id`. Returns true if one existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    async fn delete(&self, node_id: NodeId) -> ShutdownResult<bool>;
}

#[async_trait]
impl ShutdownRecordStore for ClusterHandle {
    async fn put(&self, request: PutShutdownRequest, now_us: u64, limits: Limits) -> ShutdownResult<ShutdownRecord> {
        self.submit_update("put-node-shutdown", move |state| {
            let record = prepare_record(state, &request, now_us, &limits)?;
            let next = state.with_shutdowns(state.shutdowns().with_record(record.clone()));
            Ok::<_, ShutdownError>((next, record))
        })
        .await
    }

    fn get(&self, node_id: &NodeId) -> Option<ShutdownRecord> {
        self.current().shutdowns().get(node_id).cloned()
    }

    async fn delete(&self, node_id: NodeId) -> ShutdownResult<bool> {
        self.submit_update("delete-node-shutdown", move |state| {
            let existed = state.shutdowns().contains(&node_id);
            let next = state.with_shutdowns(state.shutdowns().without_record(&node_id));
            Ok::<_, ShutdownError>((next, existed))
        })
        .await
    }
}
