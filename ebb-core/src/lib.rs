//! Ebb Core - Strongly-typed identifiers and configuration for Ebb.
//!
//! This crate provides the identifiers shared by every Ebb crate, the core
//! error type, and the [`Limits`] that bound the node-shutdown subsystem.
//!
//! # Design Principles (TigerStyle)
//!
//! - **Strongly-typed IDs**: Prevent mixing up a node id with a node name
//! - **Explicit limits**: Every resource has a bounded maximum
//! - **Explicit types**: Use u32/u64, not usize
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod limits;
mod types;

pub use error::{Error, Result};
pub use limits::Limits;
pub use types::{AllocationId, IndexName, NodeId, NodeName, ShardId, StateVersion};
