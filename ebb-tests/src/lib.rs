//! Ebb Tests - Simulation and scenario tests for Ebb.
//!
//! The shutdown core never moves shards itself; it reads snapshots produced by
//! an allocation engine. This crate supplies a deterministic stand-in engine so
//! the core can be exercised through whole shutdown lifecycles.
//!
//! ## Test Organization
//!
//! **Scenario Tests** (`scenario_tests`): Hand-built clusters walked through a
//! shutdown step by step
//!
//! **Property Tests** (`property_tests`): Randomized clusters from seeded
//! `ChaCha8Rng`, checked against the properties in `properties` after every
//! allocation round
//!
//! **Lifecycle Tests** (`lifecycle_tests`): The coordinator, service and status
//! publication running together on tokio
//!
//! **Support Modules**:
//! - `simulated_allocator`: Deterministic reroute driven by the decider chain
//! - `scenarios`: `TestCluster` harness, random cluster generation, seeds
//! - `properties`: Property violations and checkers
//!
//! ## Naming Conventions
//!
//! - Property tests: `test_property_<invariant>`
//! - Scenario tests: `test_<scenario>_<behavior>`
//! - Unit tests: Inline in each crate under `#[cfg(test)]`

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod properties;
pub mod scenarios;
pub mod simulated_allocator;

#[cfg(test)]
mod lifecycle_tests;
#[cfg(test)]
mod scenario_tests;
