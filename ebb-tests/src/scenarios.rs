//! Reusable scenarios for Ebb shutdown tests.
//!
//! `TestCluster` drives a cluster through a `ClusterApplier` with the shutdown
//! lifecycle listener registered, so every change a test makes publishes a
//! fresh status table the same way the coordinator would.

use std::sync::Arc;

use ebb_cluster::{
    AllocationFilter, ClusterApplier, ClusterResult, ClusterState, DiscoveryNode, DiscoveryNodes,
    IndexMetadata, Metadata, RoutingTable, ShardRouting,
};
use ebb_core::{Limits, NodeId};
use ebb_shutdown::{
    prepare_record, shutdown_aware_deciders, MigrationStatus, PutShutdownRequest, ShardMigrationStatusComputer,
    ShutdownLifecycleListener, ShutdownResult, StatusTable,
};
use rand::Rng;
use tokio::sync::watch;
use tracing::debug;

use crate::simulated_allocator::SimulatedAllocator;

/// Upper bound on reroute rounds before `settle` gives up.
pub const MAX_SETTLE_ROUNDS: u32 = 64;

/// Standard cluster configurations.
pub mod clusters {
    /// Two data nodes.
    pub const TWO_NODE: &[(&str, &str)] = &[("a", "node-a"), ("b", "node-b")];

    /// Three data nodes.
    pub const THREE_NODE: &[(&str, &str)] = &[("a", "node-a"), ("b", "node-b"), ("c", "node-c")];
}

/// Seeds for reproducible testing.
pub mod seeds {
    /// Standard test seeds that have historically found bugs.
    pub const REGRESSION_SEEDS: &[u64] = &[42, 12345, 0xDEAD_BEEF, 999, 7777, 0x1337, 0xCAFE_BABE, 1, u64::MAX, 0];

    /// Number of random seeds to test in CI.
    pub const CI_SEED_COUNT: u32 = 100;
}

/// An in-process cluster with a deterministic allocator and a logical clock.
#[derive(Debug)]
pub struct TestCluster {
    applier: ClusterApplier,
    allocator: SimulatedAllocator,
    computer: ShardMigrationStatusComputer,
    statuses: watch::Receiver<Arc<StatusTable>>,
    limits: Limits,
    clock_us: u64,
}

impl TestCluster {
    /// Creates a cluster of data nodes from `(id, name)` pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if two nodes share an id or a name.
    pub fn new(nodes: &[(&str, &str)]) -> ClusterResult<Self> {
        Self::with_nodes(nodes.iter().map(|(id, name)| DiscoveryNode::data(*id, *name)), Limits::new())
    }

    /// Creates a cluster of arbitrary nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if two nodes share an id or a name.
    pub fn with_nodes(nodes: impl IntoIterator<Item = DiscoveryNode>, limits: Limits) -> ClusterResult<Self> {
        let initial = ClusterState::new(DiscoveryNodes::from_nodes(nodes)?, RoutingTable::new(), Metadata::new());
        let deciders = Arc::new(shutdown_aware_deciders(&limits));
        let computer = ShardMigrationStatusComputer::new(Arc::clone(&deciders), &limits);
        let (listener, statuses) = ShutdownLifecycleListener::new(computer.clone());
        let (mut applier, _) = ClusterApplier::new(initial);
        applier.add_listener(Arc::new(listener));
        Ok(Self {
            applier,
            allocator: SimulatedAllocator::new(deciders),
            computer,
            statuses,
            limits,
            clock_us: 0,
        })
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> Arc<ClusterState> {
        Arc::clone(self.applier.state())
    }

    /// Returns the status computer wired to the cluster's decider chain.
    #[must_use]
    pub const fn computer(&self) -> &ShardMigrationStatusComputer {
        &self.computer
    }

    /// Returns the limits the cluster was built with.
    #[must_use]
    pub const fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Returns the most recently published status table.
    #[must_use]
    pub fn status_table(&self) -> Arc<StatusTable> {
        Arc::clone(&self.statuses.borrow())
    }

    /// Returns the published status of `node_id`, if it has an active record.
    #[must_use]
    pub fn status(&self, node_id: &str) -> Option<MigrationStatus> {
        self.statuses.borrow().get(&NodeId::new(node_id)).cloned()
    }

    /// Returns the copies currently assigned to `node_id`.
    #[must_use]
    pub fn shards_on(&self, node_id: &str) -> Vec<ShardRouting> {
        self.state()
            .routing()
            .shards_on_node(&NodeId::new(node_id))
            .cloned()
            .collect()
    }

    /// Creates `index` with every copy unassigned.
    ///
    /// # Errors
    ///
    /// Returns an error if the index already exists.
    pub fn create_index(&mut self, index: IndexMetadata) -> ClusterResult<()> {
        let candidate = self.state().with_index(index)?;
        self.applier.apply("create-index", candidate);
        Ok(())
    }

    /// Adds `node` to membership.
    ///
    /// # Errors
    ///
    /// Returns an error if the node id or name is already in use.
    pub fn join(&mut self, node: DiscoveryNode) -> ClusterResult<()> {
        let candidate = self.state().with_node_joined(node)?;
        self.applier.apply("node-join", candidate);
        Ok(())
    }

    /// Removes `node_id` from membership, unwinding its copies.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is not a member.
    pub fn leave(&mut self, node_id: &str) -> ClusterResult<()> {
        let candidate = self.state().with_node_left(&NodeId::new(node_id))?;
        self.applier.apply("node-left", candidate);
        Ok(())
    }

    /// Registers or overwrites a shutdown record, advancing the clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is rejected.
    pub fn put_shutdown(&mut self, request: &PutShutdownRequest) -> ShutdownResult<()> {
        self.clock_us += 1;
        let state = self.state();
        let record = prepare_record(&state, request, self.clock_us, &self.limits)?;
        let candidate = state.with_shutdowns(state.shutdowns().with_record(record));
        self.applier.apply("put-node-shutdown", candidate);
        Ok(())
    }

    /// Deletes the record for `node_id`. Returns whether one existed.
    pub fn delete_shutdown(&mut self, node_id: &str) -> bool {
        let node_id = NodeId::new(node_id);
        let state = self.state();
        if !state.shutdowns().contains(&node_id) {
            return false;
        }
        let candidate = state.with_shutdowns(state.shutdowns().without_record(&node_id));
        self.applier.apply("delete-node-shutdown", candidate);
        true
    }

    /// Runs one reroute round without finishing recoveries.
    ///
    /// # Errors
    ///
    /// Returns an error if a routing transition fails.
    pub fn reroute(&mut self) -> ClusterResult<()> {
        let candidate = self.allocator.reroute(&self.state())?;
        self.applier.apply("reroute", candidate);
        Ok(())
    }

    /// Finishes every recovery in flight.
    ///
    /// # Errors
    ///
    /// Returns an error if a routing transition fails.
    pub fn start_recoveries(&mut self) -> ClusterResult<()> {
        let candidate = SimulatedAllocator::start_recoveries(&self.state())?;
        self.applier.apply("shard-started", candidate);
        Ok(())
    }

    /// Reroutes and recovers until nothing changes. Returns the rounds taken.
    ///
    /// # Errors
    ///
    /// Returns an error if a routing transition fails.
    pub fn settle(&mut self) -> ClusterResult<u32> {
        for round in 0..MAX_SETTLE_ROUNDS {
            let before = self.state();
            self.reroute()?;
            self.start_recoveries()?;
            if self.state().version() == before.version() {
                debug!(rounds = round, "cluster settled");
                return Ok(round);
            }
        }
        Ok(MAX_SETTLE_ROUNDS)
    }
}

/// A randomly generated cluster plus replacement targets that have not joined.
#[derive(Debug)]
pub struct RandomCluster {
    /// The settled cluster with shutdown records registered.
    pub cluster: TestCluster,
    /// Replacement targets named by records but not yet members.
    pub pending_joins: Vec<DiscoveryNode>,
}

/// Builds a settled random cluster and registers random shutdown records.
///
/// Node `n0` always holds data so every index has somewhere to live.
///
/// # Errors
///
/// Returns an error if the generated cluster is rejected, which indicates a bug.
pub fn random_cluster<R: Rng>(rng: &mut R, limits: Limits) -> ShutdownResult<RandomCluster> {
    let node_count = rng.gen_range(2..=5);
    let nodes: Vec<DiscoveryNode> = (0..node_count)
        .map(|i| {
            let (id, name) = (format!("n{i}"), format!("node-{i}"));
            if i > 0 && rng.gen_ratio(1, 5) {
                DiscoveryNode::master_only(id, name)
            } else {
                DiscoveryNode::data(id, name)
            }
        })
        .collect();
    let data_names: Vec<String> = nodes
        .iter()
        .filter(|n| n.is_data_node())
        .map(|n| n.name.as_str().to_string())
        .collect();

    let mut cluster = TestCluster::with_nodes(nodes.clone(), limits)?;
    for i in 0..rng.gen_range(1..=3) {
        let mut index = IndexMetadata::new(format!("idx-{i}"), rng.gen_range(1..=3), rng.gen_range(0..=1));
        if rng.gen_ratio(1, 4) {
            let pinned = &data_names[rng.gen_range(0..data_names.len())];
            index = index.with_filter(AllocationFilter::require_name(pinned.clone()));
        }
        cluster.create_index(index)?;
    }
    cluster.settle()?;

    let mut pending_joins = Vec::new();
    for (i, node) in nodes.iter().enumerate() {
        if !rng.gen_ratio(1, 3) {
            continue;
        }
        let request = match rng.gen_range(0..3) {
            0 => PutShutdownRequest::remove(node.id.clone(), "decommission"),
            1 => PutShutdownRequest::restart(node.id.clone(), "kernel upgrade"),
            _ => {
                let others: Vec<&DiscoveryNode> = nodes.iter().filter(|n| n.id != node.id).collect();
                if rng.gen_bool(0.5) && !others.is_empty() {
                    let target = others[rng.gen_range(0..others.len())];
                    PutShutdownRequest::replace(node.id.clone(), target.name.clone(), "hardware refresh")
                } else {
                    let target = DiscoveryNode::data(format!("r{i}"), format!("replacement-{i}"));
                    let request =
                        PutShutdownRequest::replace(node.id.clone(), target.name.clone(), "hardware refresh");
                    pending_joins.push(target);
                    request
                }
            }
        };
        cluster.put_shutdown(&request)?;
    }

    Ok(RandomCluster { cluster, pending_joins })
}
