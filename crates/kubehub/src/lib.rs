//! kfold kubehub: fetches the selected resources of every cluster and groups them by identity.

#![forbid(unsafe_code)]

use std::time::Instant;

use anyhow::{bail, Context, Result};
use futures::future::try_join_all;
use kfold_core::{Cluster, ClusterIndex, ClusterResources, Node, NodePath, Patterns, ResourceId};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

mod api;
mod dir;

pub use api::{with_defaults, KubeFetcher, DEFAULT_EXCLUDED_RESOURCES, DEFAULT_LABEL_SELECTORS};
pub use dir::DirFetcher;

/// A served resource type as discovery reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredResource {
    pub group: String,
    pub version: String,
    pub kind: String,
    /// Lowercase plural, e.g. `deployments`; empty when unknown.
    #[serde(default)]
    pub plural: String,
    pub namespaced: bool,
}

impl DiscoveredResource {
    /// `v1/Kind` for the core group, `group/v1/Kind` otherwise.
    pub fn gvk_key(&self) -> String {
        if self.group.is_empty() {
            format!("{}/{}", self.version, self.kind)
        } else {
            format!("{}/{}/{}", self.group, self.version, self.kind)
        }
    }

    /// `plural.group`, as kubectl spells resource types (`replicasets.apps`, `pods`).
    pub fn resource_name(&self) -> String {
        if self.group.is_empty() {
            self.plural.clone()
        } else {
            format!("{}.{}", self.plural, self.group)
        }
    }

    fn from_id(id: &ResourceId) -> Self {
        Self {
            group: id.group().to_string(),
            version: id.version().to_string(),
            kind: id.kind.clone(),
            plural: String::new(),
            namespaced: id.namespace.is_some(),
        }
    }
}

/// Which objects to fetch. Resource types match by `group/version/Kind` key, by kind, by `plural.group` or by bare
/// plural.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSelector {
    #[serde(default)]
    pub api_resources: Patterns,
    #[serde(default)]
    pub namespaces: Patterns,
    #[serde(default)]
    pub names: Patterns,
    /// Label selectors applied when listing from an API server.
    #[serde(default)]
    pub label_selectors: Vec<String>,
}

impl ResourceSelector {
    pub fn matches_type(&self, res: &DiscoveredResource) -> bool {
        let key = res.gvk_key();
        let name = res.resource_name();
        let mut names = vec![key.as_str(), res.kind.as_str()];
        if !res.plural.is_empty() {
            names.push(&name);
            names.push(&res.plural);
        }
        self.api_resources.matches_any(&names)
    }

    /// Namespace filtering applies to namespaced objects only.
    pub fn matches_object(&self, namespace: Option<&str>, name: &str) -> bool {
        namespace.map_or(true, |ns| self.namespaces.matches(ns)) && self.names.matches(name)
    }

    pub fn matches(&self, id: &ResourceId) -> bool {
        self.matches_type(&DiscoveredResource::from_id(id)) && self.matches_object(id.namespace.as_deref(), &id.name)
    }
}

/// True when no selectors are given or any selector matches.
pub fn selected(selectors: &[ResourceSelector], id: &ResourceId) -> bool {
    selectors.is_empty() || selectors.iter().any(|s| s.matches(id))
}

/// Source of per-cluster documents.
#[async_trait::async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, cluster: &Cluster, selectors: &[ResourceSelector]) -> Result<Vec<Node>>;
}

/// Fetch every cluster concurrently, strip `skip` paths and group documents by identity.
///
/// The first failing cluster aborts the whole collection. One identity twice in the same cluster is an error.
pub async fn collect(
    index: &ClusterIndex,
    fetcher: &dyn Fetch,
    selectors: &[ResourceSelector],
    skip: &[NodePath],
) -> Result<ClusterResources> {
    let started = Instant::now();
    let fetches = index.iter().map(|(id, cluster)| async move {
        let t = Instant::now();
        let docs = fetcher.fetch(cluster, selectors).await.with_context(|| format!("fetching cluster {}", cluster.name))?;
        histogram!("fetch_cluster_ms", t.elapsed().as_secs_f64() * 1000.0);
        debug!(cluster = %cluster.name, docs = docs.len(), "cluster fetched");
        anyhow::Ok((id, cluster, docs))
    });
    let fetched = try_join_all(fetches).await?;

    let mut out = ClusterResources::new(index.clone());
    let mut removed = 0usize;
    for (cid, cluster, docs) in fetched {
        for mut doc in docs {
            removed += skip.iter().map(|p| doc.remove_path(p)).sum::<usize>();
            let id = ResourceId::from_node(&doc).with_context(|| format!("document from cluster {}", cluster.name))?;
            if out.insert(id.clone(), cid, doc).is_some() {
                bail!("duplicate resource {id} in cluster {}", cluster.name);
            }
        }
    }
    counter!("fetch_resources_total", out.len() as u64);
    info!(clusters = index.len(), resources = out.len(), skipped_fields = removed, took_ms = %started.elapsed().as_millis(), "resources collected");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sel(yaml: &str) -> ResourceSelector { serde_yaml::from_str(yaml).unwrap() }

    #[test]
    fn selectors_match_key_kind_or_resource_name() {
        let deploy = DiscoveredResource {
            group: "apps".into(),
            version: "v1".into(),
            kind: "Deployment".into(),
            plural: "deployments".into(),
            namespaced: true,
        };
        assert_eq!(deploy.gvk_key(), "apps/v1/Deployment");
        assert_eq!(deploy.resource_name(), "deployments.apps");
        assert!(sel("apiResources: [apps/v1/Deployment]").matches_type(&deploy));
        assert!(sel("apiResources: [Deployment]").matches_type(&deploy));
        assert!(sel("apiResources: ['*.apps']").matches_type(&deploy));
        assert!(!sel("apiResources: ['*', -deployments.apps]").matches_type(&deploy));
        assert!(sel("{}").matches_type(&deploy));
        let job = DiscoveredResource { group: "batch".into(), kind: "Job".into(), plural: "jobs".into(), ..deploy };
        assert!(!sel("apiResources: [-jobs]").matches_type(&job));
    }

    #[test]
    fn object_filters() {
        let s = sel("namespaces: [prod-*]\nnames: ['*', -tmp-*]");
        assert!(s.matches(&ResourceId::new("v1", "ConfigMap", Some("prod-a"), "cfg")));
        assert!(!s.matches(&ResourceId::new("v1", "ConfigMap", Some("dev"), "cfg")));
        assert!(!s.matches(&ResourceId::new("v1", "ConfigMap", Some("prod-a"), "tmp-1")));
        assert!(s.matches(&ResourceId::new("v1", "Namespace", None, "dev")));
        assert!(selected(&[], &ResourceId::new("v1", "Namespace", None, "dev")));
    }
}
