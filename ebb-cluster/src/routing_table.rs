//! Routing table - placement of every shard copy in the cluster.
//!
//! The table keeps two secondary indexes next to the primary copy map:
//! copies by shard and copies by node. Per-node queries are proportional to
//! the number of copies on that node, not the size of the cluster.

use std::collections::{BTreeMap, BTreeSet};

use ebb_core::{AllocationId, NodeId, ShardId};

use crate::error::{ClusterError, ClusterResult};
use crate::shard_routing::{ShardRouting, ShardRoutingState};

/// Placement of every shard copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTable {
    /// All copies by allocation id.
    copies: BTreeMap<AllocationId, ShardRouting>,
    /// Copies grouped by shard.
    by_shard: BTreeMap<ShardId, BTreeSet<AllocationId>>,
    /// Assigned copies grouped by the node they are on.
    by_node: BTreeMap<NodeId, BTreeSet<AllocationId>>,
    /// Next allocation id to hand out.
    next_allocation_id: AllocationId,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingTable {
    /// Creates an empty routing table.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // BTreeMap::new() is not const stable
    pub fn new() -> Self {
        Self {
            copies: BTreeMap::new(),
            by_shard: BTreeMap::new(),
            by_node: BTreeMap::new(),
            next_allocation_id: AllocationId::new(1),
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Returns the copy with the given allocation id.
    #[must_use]
    pub fn get(&self, allocation_id: AllocationId) -> Option<&ShardRouting> {
        self.copies.get(&allocation_id)
    }

    /// Returns the number of copies, assigned or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.copies.len()
    }

    /// Returns true if the table holds no copies.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.copies.is_empty()
    }

    /// Iterates over every copy in allocation-id order.
    pub fn iter(&self) -> impl Iterator<Item = &ShardRouting> {
        self.copies.values()
    }

    /// Iterates over the copies currently on `node_id`.
    ///
    /// Includes RELOCATING sources and relocation targets recovering onto the node.
    pub fn shards_on_node<'a>(&'a self, node_id: &NodeId) -> impl Iterator<Item = &'a ShardRouting> + 'a {
        self.by_node
            .get(node_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.copies.get(id))
    }

    /// Returns the number of copies on `node_id`.
    #[must_use]
    pub fn shard_count_on_node(&self, node_id: &NodeId) -> usize {
        self.by_node.get(node_id).map_or(0, BTreeSet::len)
    }

    /// Returns the number of copies recovering onto `node_id`.
    #[must_use]
    pub fn initializing_on_node(&self, node_id: &NodeId) -> usize {
        self.shards_on_node(node_id)
            .filter(|c| c.state == ShardRoutingState::Initializing)
            .count()
    }

    /// Iterates over every copy of `shard_id`.
    pub fn copies_of<'a>(&'a self, shard_id: &ShardId) -> impl Iterator<Item = &'a ShardRouting> + 'a {
        self.by_shard
            .get(shard_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.copies.get(id))
    }

    /// Returns the primary copy of `shard_id`.
    #[must_use]
    pub fn primary_of(&self, shard_id: &ShardId) -> Option<&ShardRouting> {
        self.copies_of(shard_id).find(|c| c.primary)
    }

    /// Iterates over unassigned copies, primaries first.
    pub fn unassigned(&self) -> impl Iterator<Item = &ShardRouting> {
        let primaries = self
            .copies
            .values()
            .filter(|c| c.state == ShardRoutingState::Unassigned && c.primary);
        let replicas = self
            .copies
            .values()
            .filter(|c| c.state == ShardRoutingState::Unassigned && !c.primary);
        primaries.chain(replicas)
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// Adds a new unassigned copy of `shard_id`.
    pub fn add_copy(&mut self, shard_id: ShardId, primary: bool) -> AllocationId {
        let allocation_id = self.next_allocation_id;
        self.next_allocation_id = allocation_id.next();
        self.by_shard
            .entry(shard_id.clone())
            .or_default()
            .insert(allocation_id);
        self.copies.insert(
            allocation_id,
            ShardRouting::unassigned(allocation_id, shard_id, primary),
        );
        allocation_id
    }

    /// Begins recovering an unassigned copy onto `node_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the copy is unknown or not unassigned.
    pub fn initialize(&mut self, allocation_id: AllocationId, node_id: NodeId) -> ClusterResult<()> {
        let copy = self.copy_in_state(allocation_id, ShardRoutingState::Unassigned, "initialize")?;
        copy.state = ShardRoutingState::Initializing;
        copy.current_node = Some(node_id.clone());
        self.place(allocation_id, node_id);
        Ok(())
    }

    /// Marks an initializing copy as started.
    ///
    /// Starting a relocation target retires its RELOCATING source.
    ///
    /// # Errors
    ///
    /// Returns an error if the copy is unknown or not initializing.
    pub fn start(&mut self, allocation_id: AllocationId) -> ClusterResult<()> {
        let copy = self.copy_in_state(allocation_id, ShardRoutingState::Initializing, "start")?;
        copy.state = ShardRoutingState::Started;
        let source_node = copy.relocating_node.take();
        let shard_id = copy.shard_id.clone();
        let target_node = copy.current_node.clone();

        if let Some(source_node) = source_node {
            if let Some(source_id) = self.relocation_source(&shard_id, &source_node, target_node.as_ref()) {
                self.remove_copy(source_id);
            }
        }
        Ok(())
    }

    /// Starts moving a started copy to `target_node`.
    ///
    /// Returns the allocation id of the new INITIALIZING target copy.
    ///
    /// # Errors
    ///
    /// Returns an error if the copy is unknown, not started, or already on `target_node`.
    pub fn relocate(&mut self, allocation_id: AllocationId, target_node: NodeId) -> ClusterResult<AllocationId> {
        let copy = self.copy_in_state(allocation_id, ShardRoutingState::Started, "relocate")?;
        if copy.current_node.as_ref() == Some(&target_node) {
            return Err(ClusterError::SameNode {
                allocation_id,
                node_id: target_node,
            });
        }
        copy.state = ShardRoutingState::Relocating;
        copy.relocating_node = Some(target_node.clone());
        let shard_id = copy.shard_id.clone();
        let primary = copy.primary;
        let source_node = copy.current_node.clone();

        let target_id = self.add_copy(shard_id, primary);
        if let Some(target) = self.copies.get_mut(&target_id) {
            target.state = ShardRoutingState::Initializing;
            target.current_node = Some(target_node.clone());
            target.relocating_node = source_node;
        }
        self.place(target_id, target_node);
        Ok(target_id)
    }

    /// Unwinds every copy on a node that has left the cluster.
    ///
    /// - A relocation away from the node is cancelled and the copy becomes unassigned
    /// - A relocation onto the node is cancelled and its source resumes serving
    /// - Any other copy becomes unassigned
    ///
    /// A lost primary is replaced by promoting a started replica of the same shard,
    /// if one exists; the unassigned copy is demoted to a replica.
    pub fn remove_node(&mut self, node_id: &NodeId) {
        let Some(on_node) = self.by_node.remove(node_id) else {
            return;
        };

        let mut lost_primaries = BTreeSet::new();
        for allocation_id in on_node {
            let Some(copy) = self.copies.get(&allocation_id).cloned() else {
                continue;
            };
            if copy.is_relocation_target() {
                self.copies.remove(&allocation_id);
                if let Some(ids) = self.by_shard.get_mut(&copy.shard_id) {
                    ids.remove(&allocation_id);
                }
                if let Some(source_node) = &copy.relocating_node {
                    if let Some(source_id) = self.relocation_source(&copy.shard_id, source_node, Some(node_id)) {
                        if let Some(source) = self.copies.get_mut(&source_id) {
                            source.state = ShardRoutingState::Started;
                            source.relocating_node = None;
                        }
                    }
                }
                continue;
            }

            if copy.state == ShardRoutingState::Relocating {
                if let Some(target_node) = &copy.relocating_node {
                    if let Some(target_id) = self.relocation_target(&copy.shard_id, node_id, target_node) {
                        self.remove_copy(target_id);
                    }
                }
            }

            if let Some(lost) = self.copies.get_mut(&allocation_id) {
                lost.state = ShardRoutingState::Unassigned;
                lost.current_node = None;
                lost.relocating_node = None;
                if lost.primary {
                    lost_primaries.insert(allocation_id);
                }
            }
        }

        for allocation_id in lost_primaries {
            self.promote_replica(allocation_id);
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn copy_in_state(
        &mut self,
        allocation_id: AllocationId,
        expected: ShardRoutingState,
        operation: &'static str,
    ) -> ClusterResult<&mut ShardRouting> {
        let copy = self
            .copies
            .get_mut(&allocation_id)
            .ok_or(ClusterError::UnknownAllocation { allocation_id })?;
        if copy.state != expected {
            return Err(ClusterError::InvalidTransition {
                allocation_id,
                state: copy.state,
                operation,
            });
        }
        Ok(copy)
    }

    fn place(&mut self, allocation_id: AllocationId, node_id: NodeId) {
        self.by_node.entry(node_id).or_default().insert(allocation_id);
    }

    fn remove_copy(&mut self, allocation_id: AllocationId) {
        let Some(copy) = self.copies.remove(&allocation_id) else {
            return;
        };
        if let Some(ids) = self.by_shard.get_mut(&copy.shard_id) {
            ids.remove(&allocation_id);
        }
        if let Some(node_id) = &copy.current_node {
            if let Some(ids) = self.by_node.get_mut(node_id) {
                ids.remove(&allocation_id);
                if ids.is_empty() {
                    self.by_node.remove(node_id);
                }
            }
        }
    }

    /// Finds the RELOCATING copy on `source_node` moving towards `target_node`.
    fn relocation_source(
        &self,
        shard_id: &ShardId,
        source_node: &NodeId,
        target_node: Option<&NodeId>,
    ) -> Option<AllocationId> {
        self.copies_of(shard_id)
            .find(|c| {
                c.state == ShardRoutingState::Relocating
                    && c.current_node.as_ref() == Some(source_node)
                    && c.relocating_node.as_ref() == target_node
            })
            .map(|c| c.allocation_id)
    }

    /// Finds the INITIALIZING copy on `target_node` recovering from `source_node`.
    fn relocation_target(&self, shard_id: &ShardId, source_node: &NodeId, target_node: &NodeId) -> Option<AllocationId> {
        self.copies_of(shard_id)
            .find(|c| {
                c.is_relocation_target()
                    && c.current_node.as_ref() == Some(target_node)
                    && c.relocating_node.as_ref() == Some(source_node)
            })
            .map(|c| c.allocation_id)
    }

    fn promote_replica(&mut self, lost_primary: AllocationId) {
        let Some(shard_id) = self.copies.get(&lost_primary).map(|c| c.shard_id.clone()) else {
            return;
        };
        let candidate = self
            .copies_of(&shard_id)
            .find(|c| !c.primary && c.state.is_active())
            .map(|c| (c.allocation_id, c.current_node.clone(), c.relocating_node.clone()));
        let Some((candidate, current, moving_to)) = candidate else {
            return;
        };
        // An in-flight relocation of the promoted copy carries its role.
        let target = match (current, moving_to) {
            (Some(source), Some(target)) => self.relocation_target(&shard_id, &source, &target),
            _ => None,
        };
        for promoted in std::iter::once(candidate).chain(target) {
            if let Some(copy) = self.copies.get_mut(&promoted) {
                copy.primary = true;
            }
        }
        if let Some(lost) = self.copies.get_mut(&lost_primary) {
            lost.primary = false;
        }
    }
}
