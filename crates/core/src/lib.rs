//! kfold core types: documents, node paths, the cluster index and preset naming.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

mod cluster;
mod naming;
mod node;
mod path;
mod resource;

pub use cluster::{groups_of, Cluster, ClusterId, ClusterIndex, GroupSelector, Patterns, ALL_CLUSTERS};
pub use naming::{name_for, KnownGroups, MAX_NAME_LEN};
pub use node::{Mapping, Node, NodeKind, Scalar, ScalarTag};
pub use path::{NodePath, Segment, Selector};
pub use resource::ResourceId;

/// Errors raised by the core document and cluster types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("unknown cluster: {0}")]
    UnknownCluster(String),
    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern { pattern: String, #[source] source: globset::Error },
    #[error("document is missing {0}")]
    MissingIdentity(&'static str),
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Per-cluster documents of one resource identity.
pub type ClusterDocs = BTreeMap<ClusterId, Node>;

/// Fetch stage output: every resource identity with the documents each cluster holds for it.
#[derive(Debug, Clone, Default)]
pub struct ClusterResources {
    pub clusters: ClusterIndex,
    pub resources: BTreeMap<ResourceId, ClusterDocs>,
}

impl ClusterResources {
    pub fn new(clusters: ClusterIndex) -> Self { Self { clusters, resources: BTreeMap::new() } }

    /// Record `doc` for `cluster`. Returns the previous document for the same identity, if any.
    pub fn insert(&mut self, id: ResourceId, cluster: ClusterId, doc: Node) -> Option<Node> {
        self.resources.entry(id).or_default().insert(cluster, doc)
    }

    pub fn len(&self) -> usize { self.resources.len() }
    pub fn is_empty(&self) -> bool { self.resources.is_empty() }
}

pub mod prelude {
    pub use super::{
        Cluster, ClusterDocs, ClusterId, ClusterIndex, ClusterResources, Mapping, Node, NodeKind, NodePath, ResourceId,
        Scalar, ScalarTag, Segment,
    };
}
