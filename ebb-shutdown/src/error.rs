//! Shutdown error types.

use ebb_cluster::{ClusterError, ShutdownRecordError};
use ebb_core::{NodeId, ShardId, StateVersion};
use thiserror::Error;

/// Result type for shutdown operations.
pub type ShutdownResult<T> = Result<T, ShutdownError>;

/// A cluster state the status computer cannot interpret.
///
/// These are transient: the next accepted state supersedes them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StatusError {
    /// A shard copy is assigned to a node missing from membership.
    #[error("shard {shard_id} is assigned to node [{node_id}] which is not a member in cluster state {version}")]
    InconsistentRouting {
        /// The node the copy claims to be on.
        node_id: NodeId,
        /// The shard.
        shard_id: ShardId,
        /// The state that was inspected.
        version: StateVersion,
    },
}

/// Errors that can occur during shutdown operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShutdownError {
    /// The request violates a record invariant.
    #[error("invalid shutdown request: {0}")]
    InvalidRecord(#[from] ShutdownRecordError),

    /// Too many active records.
    #[error("too many shutdown records: {count} >= {max}")]
    TooManyRecords {
        /// Active records.
        count: u64,
        /// Configured maximum.
        max: u32,
    },

    /// The reason is too long.
    #[error("shutdown reason is {actual} bytes, limit is {max}")]
    ReasonTooLong {
        /// Reason length in bytes.
        actual: u64,
        /// Configured maximum.
        max: u32,
    },

    /// The allocation delay is too long.
    #[error("allocation delay {actual_us}us exceeds limit {max_us}us")]
    AllocationDelayTooLong {
        /// Requested delay.
        actual_us: u64,
        /// Configured maximum.
        max_us: u64,
    },

    /// The cluster rejected the update or is unavailable.
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}
