//! Validation of shutdown registrations.

use ebb_cluster::{ClusterState, NodeRegistry, ShutdownRecord, ShutdownRecordError, ShutdownType};
use ebb_core::Limits;

use crate::api::PutShutdownRequest;
use crate::error::{ShutdownError, ShutdownResult};

/// Validates a request without looking at cluster state.
///
/// Run at the API boundary so malformed requests never reach the coordinator.
///
/// # Errors
///
/// Returns an error if the request violates a record invariant or a limit.
pub fn validate_request(request: &PutShutdownRequest, registered_at_us: u64, limits: &Limits) -> ShutdownResult<ShutdownRecord> {
    let record = ShutdownRecord::new(
        request.node_id.clone(),
        request.shutdown_type,
        request.reason.clone(),
        request.target_node_name.clone(),
        request.allocation_delay_us,
        registered_at_us,
    )?;

    if request.reason.len() > limits.max_reason_bytes as usize {
        return Err(ShutdownError::ReasonTooLong {
            actual: request.reason.len() as u64,
            max: limits.max_reason_bytes,
        });
    }
    if let Some(delay_us) = request.allocation_delay_us {
        if delay_us > limits.max_allocation_delay_us {
            return Err(ShutdownError::AllocationDelayTooLong {
                actual_us: delay_us,
                max_us: limits.max_allocation_delay_us,
            });
        }
    }
    Ok(record)
}

/// Builds the record a put would store in `state`.
///
/// Runs inside the coordinator's update task, so the checks against `state`
/// are linearized with every other write.
///
/// # Errors
///
/// Returns an error if the request is invalid, the target resolves to the
/// vacating node, or the record limit is reached.
pub fn prepare_record(
    state: &ClusterState,
    request: &PutShutdownRequest,
    now_us: u64,
    limits: &Limits,
) -> ShutdownResult<ShutdownRecord> {
    let shutdowns = state.shutdowns();
    let registered_at_us = now_us.max(shutdowns.latest_registered_at_us());
    let record = validate_request(request, registered_at_us, limits)?;

    if record.shutdown_type() == ShutdownType::Replace {
        let resolved = record
            .target_node_name()
            .and_then(|name| state.nodes().resolve(name));
        if resolved == Some(record.node_id()) {
            return Err(ShutdownRecordError::SelfReplacement {
                node_id: record.node_id().clone(),
            }
            .into());
        }
    }

    if !shutdowns.contains(record.node_id()) && shutdowns.len() >= limits.max_shutdown_records as usize {
        return Err(ShutdownError::TooManyRecords {
            count: shutdowns.len() as u64,
            max: limits.max_shutdown_records,
        });
    }
    Ok(record)
}
