use std::fmt;

use serde::{Deserialize, Serialize};

use crate::node::{Mapping, Node};
use crate::Error;

/// Logical identity of a resource across clusters. Ordering is total so keyed maps iterate deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceId {
    pub api_version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceId {
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>, namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string),
            name: name.into(),
        }
    }

    /// Identity of a Kubernetes-style document.
    pub fn from_node(doc: &Node) -> crate::Result<Self> {
        let api_version = doc.get_str("apiVersion").ok_or(Error::MissingIdentity("apiVersion"))?;
        let kind = doc.get_str("kind").ok_or(Error::MissingIdentity("kind"))?;
        let meta = doc.get("metadata").ok_or(Error::MissingIdentity("metadata"))?;
        let name = meta.get_str("name").ok_or(Error::MissingIdentity("metadata.name"))?;
        Ok(Self::new(api_version, kind, meta.get_str("namespace"), name))
    }

    /// API group; empty for the core group.
    pub fn group(&self) -> &str { self.api_version.rsplit_once('/').map(|(g, _)| g).unwrap_or("") }

    pub fn version(&self) -> &str { self.api_version.rsplit_once('/').map(|(_, v)| v).unwrap_or(&self.api_version) }

    /// Minimal document carrying just the identity fields.
    pub fn seed(&self) -> Node {
        let mut meta = Mapping::new();
        meta.insert("name".into(), Node::str(&self.name));
        if let Some(ns) = &self.namespace {
            meta.insert("namespace".into(), Node::str(ns));
        }
        let mut root = Mapping::new();
        root.insert("apiVersion".into(), Node::str(&self.api_version));
        root.insert("kind".into(), Node::str(&self.kind));
        root.insert("metadata".into(), Node::Mapping(meta));
        Node::Mapping(root)
    }
}

/// `namespace/Kind/name`, with an empty namespace for cluster-scoped resources.
impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace.as_deref().unwrap_or(""), self.kind, self.name)
    }
}
