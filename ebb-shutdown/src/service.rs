//! Shutdown service: the operator-facing put / get status / delete API.

use std::sync::Arc;

use ebb_cluster::{AllocationDeciders, RoutingSnapshotSource, ShutdownRecord};
use ebb_core::Limits;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{
    AcknowledgedResponse, DeleteShutdownRequest, GetShutdownStatusRequest, GetShutdownStatusResponse,
    PutShutdownRequest, SingleNodeShutdownStatus,
};
use crate::chain::shutdown_aware_deciders;
use crate::error::ShutdownResult;
use crate::listener::{ShutdownLifecycleListener, StatusTable};
use crate::registration::validate_request;
use crate::status::ShardMigrationStatusComputer;
use crate::store::ShutdownRecordStore;

/// Serves the shutdown API on top of a cluster.
#[derive(Debug)]
pub struct ShutdownService<C> {
    cluster: C,
    computer: ShardMigrationStatusComputer,
    limits: Limits,
}

impl<C: ShutdownRecordStore + RoutingSnapshotSource> ShutdownService<C> {
    /// Creates a service using the standard shutdown-aware decider chain.
    #[must_use]
    pub fn new(cluster: C, limits: Limits) -> Self {
        Self::with_deciders(cluster, Arc::new(shutdown_aware_deciders(&limits)), limits)
    }

    /// Creates a service that evaluates status against `deciders`.
    #[must_use]
    pub fn with_deciders(cluster: C, deciders: Arc<AllocationDeciders>, limits: Limits) -> Self {
        Self {
            cluster,
            computer: ShardMigrationStatusComputer::new(deciders, &limits),
            limits,
        }
    }

    /// The underlying cluster.
    #[must_use]
    pub const fn cluster(&self) -> &C {
        &self.cluster
    }

    /// Registers or replaces the shutdown record of a node.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is invalid; nothing is applied in that case.
    pub async fn put_shutdown(&self, request: PutShutdownRequest, now_us: u64) -> ShutdownResult<AcknowledgedResponse> {
        validate_request(&request, now_us, &self.limits)?;
        let record = self.cluster.put(request, now_us, self.limits).await?;
        info!(
            node_id = %record.node_id(),
            shutdown_type = %record.shutdown_type(),
            target = ?record.target_node_name(),
            "registered node shutdown"
        );
        Ok(AcknowledgedResponse { acknowledged: true })
    }

    /// Reports records and their migration status, ordered by node id.
    ///
    /// Records and routing are read from one snapshot. A node without a record
    /// yields an empty response. A record whose status cannot be computed is
    /// left out and logged; the other records are still reported.
    #[must_use]
    pub fn get_status(&self, request: &GetShutdownStatusRequest) -> GetShutdownStatusResponse {
        let state = self.cluster.current();
        let records: Vec<&ShutdownRecord> = match &request.node_id {
            Some(node_id) => state.shutdowns().get(node_id).into_iter().collect(),
            None => state.shutdowns().iter().collect(),
        };

        let mut shutdown_statuses = Vec::with_capacity(records.len());
        for record in records {
            let status = match self.computer.compute(record, &state) {
                Ok(status) => status,
                Err(err) => {
                    warn!(
                        node_id = %record.node_id(),
                        version = %state.version(),
                        error = %err,
                        "skipping shutdown status"
                    );
                    continue;
                }
            };
            shutdown_statuses.push(SingleNodeShutdownStatus::new(
                record,
                status,
                self.limits.default_restart_allocation_delay_us,
            ));
        }
        debug!(
            version = %state.version(),
            node_id = ?request.node_id,
            count = shutdown_statuses.len(),
            "served shutdown status"
        );
        GetShutdownStatusResponse { shutdown_statuses }
    }

    /// Deletes the shutdown record of a node. Deleting a missing record succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the cluster is unavailable.
    pub async fn delete_shutdown(&self, request: DeleteShutdownRequest) -> ShutdownResult<AcknowledgedResponse> {
        let node_id = request.node_id;
        let existed = self.cluster.delete(node_id.clone()).await?;
        info!(node_id = %node_id, existed, "deleted node shutdown");
        Ok(AcknowledgedResponse { acknowledged: true })
    }

    /// Starts publishing a `StatusTable` on every cluster change.
    ///
    /// # Errors
    ///
    /// Returns an error if the cluster is unavailable.
    pub async fn publish_statuses(&self) -> ShutdownResult<watch::Receiver<Arc<StatusTable>>> {
        let (listener, receiver) = ShutdownLifecycleListener::new(self.computer.clone());
        self.cluster.on_change(Arc::new(listener)).await?;
        Ok(receiver)
    }
}
