//! Index metadata and allocation filters.

use std::collections::{BTreeMap, BTreeSet};

use ebb_core::IndexName;
use serde::{Deserialize, Serialize};

use crate::error::{ClusterError, ClusterResult};
use crate::node::DiscoveryNode;
use crate::shutdown_metadata::ShutdownMetadata;

/// Node attribute an allocation filter matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterAttribute {
    /// The node name (`_name`).
    Name,
    /// The node id (`_id`).
    Id,
}

impl FilterAttribute {
    fn value_of(self, node: &DiscoveryNode) -> &str {
        match self {
            Self::Name => node.name.as_str(),
            Self::Id => node.id.as_str(),
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Name => "_name",
            Self::Id => "_id",
        }
    }
}

/// How a filter constrains allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    /// The node must match every `require` filter.
    Require,
    /// The node must match at least one `include` filter, if any exist.
    Include,
    /// The node must not match any `exclude` filter.
    Exclude,
}

/// One `index.routing.allocation.<kind>.<attribute>` setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationFilter {
    /// Filter kind.
    pub kind: FilterKind,
    /// Attribute matched.
    pub attribute: FilterAttribute,
    /// Accepted values; a node matches if its attribute equals any of them.
    pub values: BTreeSet<String>,
}

impl AllocationFilter {
    /// Creates a filter.
    #[must_use]
    pub fn new(
        kind: FilterKind,
        attribute: FilterAttribute,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            kind,
            attribute,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Pins an index to the node named `name`.
    #[must_use]
    pub fn require_name(name: impl Into<String>) -> Self {
        Self::new(FilterKind::Require, FilterAttribute::Name, [name.into()])
    }

    /// Returns true if the node's attribute equals one of the filter values.
    #[must_use]
    pub fn matches(&self, node: &DiscoveryNode) -> bool {
        self.values.contains(self.attribute.value_of(node))
    }

    /// Renders the filter as its setting, e.g. `require._name:[node-a]`.
    #[must_use]
    pub fn describe(&self) -> String {
        let kind = match self.kind {
            FilterKind::Require => "require",
            FilterKind::Include => "include",
            FilterKind::Exclude => "exclude",
        };
        let values: Vec<&str> = self.values.iter().map(String::as_str).collect();
        format!("{kind}.{}:[{}]", self.attribute.label(), values.join(","))
    }
}

/// Settings of one index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Index name.
    pub name: IndexName,
    /// Number of primary shards.
    pub number_of_shards: u32,
    /// Replicas per primary.
    #[serde(default)]
    pub number_of_replicas: u32,
    /// Allocation filters.
    #[serde(default)]
    pub filters: Vec<AllocationFilter>,
}

impl IndexMetadata {
    /// Creates index metadata without filters.
    ///
    /// # Panics
    ///
    /// Panics if `number_of_shards` is zero.
    #[must_use]
    pub fn new(name: impl Into<IndexName>, number_of_shards: u32, number_of_replicas: u32) -> Self {
        assert!(number_of_shards > 0, "index must have at least one shard");
        Self {
            name: name.into(),
            number_of_shards,
            number_of_replicas,
            filters: Vec::new(),
        }
    }

    /// Adds an allocation filter.
    #[must_use]
    pub fn with_filter(mut self, filter: AllocationFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Returns the first filter rule `node` violates, or `None` if it may hold shards of this index.
    #[must_use]
    pub fn filter_violation(&self, node: &DiscoveryNode) -> Option<&AllocationFilter> {
        let includes: Vec<&AllocationFilter> = self
            .filters
            .iter()
            .filter(|f| f.kind == FilterKind::Include)
            .collect();
        if !includes.is_empty() && !includes.iter().any(|f| f.matches(node)) {
            return includes.first().copied();
        }
        self.filters.iter().find(|f| match f.kind {
            FilterKind::Require => !f.matches(node),
            FilterKind::Exclude => f.matches(node),
            FilterKind::Include => false,
        })
    }
}

/// Cluster-wide metadata: indices and shutdown records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    indices: BTreeMap<IndexName, IndexMetadata>,
    /// Active shutdown records.
    pub shutdowns: ShutdownMetadata,
}

impl Metadata {
    /// Creates empty metadata.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the settings of `index`.
    #[must_use]
    pub fn index(&self, index: &IndexName) -> Option<&IndexMetadata> {
        self.indices.get(index)
    }

    /// Iterates over all indices in name order.
    pub fn indices(&self) -> impl Iterator<Item = &IndexMetadata> {
        self.indices.values()
    }

    /// Returns a copy with `index` added.
    ///
    /// # Errors
    ///
    /// Returns an error if an index with the same name exists.
    pub fn with_index(&self, index: IndexMetadata) -> ClusterResult<Self> {
        if self.indices.contains_key(&index.name) {
            return Err(ClusterError::DuplicateIndex { index: index.name });
        }
        let mut next = self.clone();
        next.indices.insert(index.name.clone(), index);
        Ok(next)
    }

    /// Returns a copy with the shutdown records replaced.
    #[must_use]
    pub fn with_shutdowns(&self, shutdowns: ShutdownMetadata) -> Self {
        Self {
            indices: self.indices.clone(),
            shutdowns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, name: &str) -> DiscoveryNode {
        DiscoveryNode::data(id, name)
    }

    #[test]
    fn test_require_name_filter() {
        let index = IndexMetadata::new("logs", 1, 0).with_filter(AllocationFilter::require_name("node-a"));

        assert!(index.filter_violation(&node("a", "node-a")).is_none());
        let violated = index.filter_violation(&node("b", "node-b")).unwrap();
        assert_eq!(violated.describe(), "require._name:[node-a]");
    }

    #[test]
    fn test_include_filter_needs_one_match() {
        let index = IndexMetadata::new("logs", 1, 0)
            .with_filter(AllocationFilter::new(FilterKind::Include, FilterAttribute::Id, ["a", "b"]));

        assert!(index.filter_violation(&node("a", "node-a")).is_none());
        assert!(index.filter_violation(&node("b", "node-b")).is_none());
        assert!(index.filter_violation(&node("c", "node-c")).is_some());
    }

    #[test]
    fn test_exclude_filter() {
        let index = IndexMetadata::new("logs", 1, 0)
            .with_filter(AllocationFilter::new(FilterKind::Exclude, FilterAttribute::Name, ["node-a"]));

        assert!(index.filter_violation(&node("a", "node-a")).is_some());
        assert!(index.filter_violation(&node("b", "node-b")).is_none());
    }

    #[test]
    fn test_duplicate_index_rejected() {
        let metadata = Metadata::new().with_index(IndexMetadata::new("logs", 1, 0)).unwrap();
        let err = metadata.with_index(IndexMetadata::new("logs", 2, 0)).unwrap_err();
        assert!(matches!(err, ClusterError::DuplicateIndex { .. }));
        assert_eq!(metadata.indices().count(), 1);
    }
}
