//! Ebb Shutdown - Graceful node shutdown for Ebb clusters.
//!
//! An operator marks a node for REMOVE, RESTART or REPLACE. This crate
//! derives how far the node's shard evacuation has progressed and constrains
//! allocation so that a replacement target only receives the data of the
//! node it replaces.
//!
//! # Components
//!
//! - [`ShardMigrationStatusComputer`]: pure function from (record, cluster state)
//!   to a [`MigrationStatus`]
//! - [`ReplacementAllocationDecider`]: keeps unrelated shards off a replacement
//!   target and overrides filters for shards coming from the vacating node
//! - [`NodeShutdownAllocationDecider`]: keeps new shards off vacating nodes
//! - [`ShutdownLifecycleListener`]: recomputes every status on each accepted
//!   cluster state and publishes a [`StatusTable`]
//! - [`ShutdownService`]: put / get status / delete
//!
//! Status is never stored. It is always recomputed from the latest snapshot,
//! so a record registered while its replacement target is offline converges
//! as soon as the target joins.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod api;
mod chain;
mod error;
mod listener;
mod node_shutdown;
mod registration;
mod replacement;
mod service;
mod status;
mod store;

pub use api::{
    AcknowledgedResponse, DeleteShutdownRequest, GetShutdownStatusRequest,
    GetShutdownStatusResponse, PutShutdownRequest, SingleNodeShutdownStatus,
};
pub use chain::shutdown_aware_deciders;
pub use error::{ShutdownError, ShutdownResult, StatusError};
pub use listener::{ShutdownLifecycleListener, StatusTable};
pub use node_shutdown::NodeShutdownAllocationDecider;
pub use registration::{prepare_record, validate_request};
pub use replacement::ReplacementAllocationDecider;
pub use service::ShutdownService;
pub use status::{MigrationStatus, ShardMigrationState, ShardMigrationStatusComputer};
pub use store::ShutdownRecordStore;
