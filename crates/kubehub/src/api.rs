use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use kube::{
    api::{Api, ListParams},
    config::{KubeConfigOptions, Kubeconfig},
    core::{ApiResource, DynamicObject, TypeMeta},
    discovery::{verbs, Discovery, Scope},
    Client, Config,
};
use kfold_core::{Cluster, Node};
use metrics::{counter, histogram};
use tracing::{debug, info};

use crate::{DiscoveredResource, Fetch, ResourceSelector};

/// Resource types skipped by selectors that do not name what they include.
pub const DEFAULT_EXCLUDED_RESOURCES: &[&str] = &[
    "*.coordination.k8s.io",
    "*.discovery.k8s.io",
    "*.events.k8s.io",
    "csistoragecapacities.storage.k8s.io",
    "endpoints",
    "events",
    "jobs",
    "limitranges",
    "pods",
    "replicasets.apps",
    "*.admissionregistration.k8s.io",
    "*.apiregistration.k8s.io",
    "*.flowcontrol.apiserver.k8s.io",
    "*.scheduling.k8s.io",
    "componentstatuses",
    "csinodes.storage.k8s.io",
    "nodes",
    "persistentvolumes",
    "volumeattachments.storage.k8s.io",
];

/// Added to every selector; keeps control-plane bootstrap objects out.
pub const DEFAULT_LABEL_SELECTORS: &[&str] = &["!kubernetes.io/bootstrapping"];

/// Selectors as listed against an API server: no selectors means everything, selectors without resource
/// includes skip [`DEFAULT_EXCLUDED_RESOURCES`], and every selector carries [`DEFAULT_LABEL_SELECTORS`].
pub fn with_defaults(selectors: &[ResourceSelector]) -> Result<Vec<ResourceSelector>> {
    let mut out = if selectors.is_empty() { vec![ResourceSelector::default()] } else { selectors.to_vec() };
    for sel in &mut out {
        if !sel.api_resources.has_includes() {
            sel.api_resources.exclude(DEFAULT_EXCLUDED_RESOURCES.iter().copied())?;
        }
        sel.label_selectors.extend(DEFAULT_LABEL_SELECTORS.iter().map(|s| s.to_string()));
    }
    Ok(out)
}

/// Lists resources from live clusters, one kubeconfig context per cluster name.
#[derive(Debug, Clone, Default)]
pub struct KubeFetcher {
    kubeconfig: Option<PathBuf>,
}

impl KubeFetcher {
    /// `None` reads the kubeconfig the usual way (`KUBECONFIG`, then `~/.kube/config`).
    pub fn new(kubeconfig: Option<PathBuf>) -> Self { Self { kubeconfig } }

    fn load(&self) -> Result<Kubeconfig> {
        match &self.kubeconfig {
            Some(path) => Kubeconfig::read_from(path).with_context(|| format!("reading kubeconfig {}", path.display())),
            None => Kubeconfig::read().context("reading kubeconfig"),
        }
    }

    /// Context names in kubeconfig order.
    pub fn contexts(&self) -> Result<Vec<String>> { Ok(self.load()?.contexts.into_iter().map(|c| c.name).collect()) }

    /// Client for one kubeconfig context.
    pub async fn client(&self, context: &str) -> Result<Client> {
        let options = KubeConfigOptions { context: Some(context.to_string()), ..Default::default() };
        let config = Config::from_custom_kubeconfig(self.load()?, &options)
            .await
            .with_context(|| format!("kubeconfig context {context}"))?;
        Ok(Client::try_from(config)?)
    }
}

/// Listable served types, sorted by gvk key.
async fn discover(client: Client) -> Result<Vec<(ApiResource, DiscoveredResource)>> {
    let discovery = Discovery::new(client).run().await.context("api discovery")?;
    let mut out = Vec::new();
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if !caps.supports_operation(verbs::LIST) {
                continue;
            }
            let res = DiscoveredResource {
                group: ar.group.clone(),
                version: ar.version.clone(),
                kind: ar.kind.clone(),
                plural: ar.plural.clone(),
                namespaced: matches!(caps.scope, Scope::Namespaced),
            };
            out.push((ar, res));
        }
    }
    out.sort_by_key(|(_, res)| res.gvk_key());
    Ok(out)
}

fn strip_managed_fields(v: &mut serde_json::Value) {
    if let Some(meta) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.remove("managedFields");
    }
}

fn to_node(mut obj: DynamicObject, ar: &ApiResource) -> Result<Node> {
    obj.types = Some(TypeMeta { api_version: ar.api_version.clone(), kind: ar.kind.clone() });
    let mut raw = serde_json::to_value(&obj).context("serializing DynamicObject")?;
    strip_managed_fields(&mut raw);
    let value = serde_yaml::to_value(&raw).context("converting object to yaml")?;
    Ok(Node::from_value(&value))
}

#[async_trait::async_trait]
impl Fetch for KubeFetcher {
    async fn fetch(&self, cluster: &Cluster, selectors: &[ResourceSelector]) -> Result<Vec<Node>> {
        let selectors = with_defaults(selectors)?;
        let client = self.client(&cluster.name).await?;
        let served = discover(client.clone()).await?;
        debug!(cluster = %cluster.name, types = served.len(), "discovered resource types");

        let mut out = Vec::new();
        for (ar, res) in &served {
            let Some(sel) = selectors.iter().find(|s| s.matches_type(res)) else { continue };
            let started = Instant::now();
            let api: Api<DynamicObject> = Api::all_with(client.clone(), ar);
            let params = ListParams::default().labels(&sel.label_selectors.join(","));
            let list = api.list(&params).await.with_context(|| format!("listing {}", res.resource_name()))?;
            histogram!("fetch_list_ms", started.elapsed().as_secs_f64() * 1000.0);
            let before = out.len();
            for obj in list.items {
                let namespace = obj.metadata.namespace.clone();
                let name = obj.metadata.name.clone().unwrap_or_default();
                if sel.matches_object(namespace.as_deref(), &name) {
                    out.push(to_node(obj, ar)?);
                }
            }
            debug!(cluster = %cluster.name, resource = %res.gvk_key(), objects = out.len() - before, "listed");
        }
        counter!("fetch_objects_total", out.len() as u64);
        info!(cluster = %cluster.name, objects = out.len(), "cluster listed");
        Ok(out)
    }
}
