//! Ebb Cluster - Cluster state, routing snapshots, and allocation deciders.
//!
//! This crate models the parts of a sharded storage cluster that the
//! node-shutdown subsystem reads: membership, shard placement, index
//! metadata and the shutdown records themselves. It also provides the
//! coordinator that serializes every state update and publishes immutable,
//! versioned snapshots to readers.
//!
//! # Design (`TigerStyle`)
//!
//! - **Immutable snapshots**: A `ClusterState` is never mutated once published;
//!   updates build a new state that replaces the previous one atomically
//! - **Single writer**: All updates flow through one coordinator task
//! - **Explicit deciders**: Allocation rules are an ordered list of values,
//!   folded left-to-right with short-circuit on the first NO
//! - **Local cost**: Per-node shard lookups never scan the whole routing table

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod applier;
mod cluster_state;
mod coordinator;
mod decider;
pub mod deciders;
mod error;
mod metadata;
mod node;
mod routing_table;
mod shard_routing;
mod shutdown_metadata;

pub use applier::{ClusterApplier, ClusterStateListener};
pub use cluster_state::{ClusterChangedEvent, ClusterState};
pub use coordinator::{spawn_cluster_coordinator, ClusterHandle, RoutingSnapshotSource};
pub use decider::{
    AllocationDecider, AllocationDeciders, AllocationOutcome, Decision, DecisionType,
    RoutingAllocation,
};
pub use error::{ClusterError, ClusterResult};
pub use metadata::{AllocationFilter, FilterAttribute, FilterKind, IndexMetadata, Metadata};
pub use node::{DiscoveryNode, DiscoveryNodes, NodeRegistry, NodeRole};
pub use routing_table::RoutingTable;
pub use shard_routing::{ShardRouting, ShardRoutingState};
pub use shutdown_metadata::{ShutdownMetadata, ShutdownRecord, ShutdownRecordError, ShutdownType};
