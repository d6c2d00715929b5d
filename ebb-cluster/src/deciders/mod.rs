//! General-purpose allocation deciders.
//!
//! These carry no shutdown knowledge; shutdown-aware deciders live in
//! `ebb-shutdown` and are composed into the same chain.

mod filter;
mod node_role;
mod same_shard;
mod throttling;

pub use filter::FilterAllocationDecider;
pub use node_role::NodeRoleAllocationDecider;
pub use same_shard::SameShardAllocationDecider;
pub use throttling::ThrottlingAllocationDecider;
