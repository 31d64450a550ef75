use std::collections::BTreeSet;

use anyhow::{bail, Context, Result};
use kfold_core::{ClusterResources, Node};
use kfold_emit::{Chart, Components, HELPERS_TPL};
use tracing::info;

use crate::kustomize::{HelmChart, HelmGlobals, Kustomization, Patch};
use crate::{resource_file, Store};

/// Tracks written paths so two resources never silently share a file.
struct Writer<'s> {
    store: &'s dyn Store,
    written: BTreeSet<String>,
}

impl<'s> Writer<'s> {
    fn new(store: &'s dyn Store) -> Self { Self { store, written: BTreeSet::new() } }

    fn put(&mut self, rel: String, bytes: &[u8]) -> Result<()> {
        if !self.written.insert(rel.clone()) {
            bail!("two outputs map to the same file {rel}");
        }
        self.store.write(&rel, bytes).with_context(|| format!("storing {rel}"))
    }

    fn doc(&mut self, rel: String, doc: &Node) -> Result<()> {
        let body = doc.to_yaml_string().with_context(|| format!("serializing {rel}"))?;
        self.put(rel, body.as_bytes())
    }

    fn kustomization(&mut self, dir: &str, kust: &Kustomization) -> Result<()> {
        self.put(format!("{dir}/kustomization.yaml"), kust.to_yaml()?.as_bytes())
    }
}

/// Overlay directory for a cluster. Names may nest with `/` but never leave `overlays/`.
fn overlay_dir(cluster: &str) -> Result<String> {
    if cluster.split('/').any(|s| s.is_empty() || s == "." || s == "..") {
        bail!("cluster name {cluster:?} cannot be used as an overlay directory");
    }
    Ok(format!("overlays/{cluster}"))
}

/// Relative path from `dir` back to the output root.
fn to_root(dir: &str) -> String { "../".repeat(dir.split('/').count()) }

/// `components/<name>/...` per component plus `overlays/<cluster>/kustomization.yaml` per cluster.
pub fn write_components(store: &dyn Store, comps: &Components<'_>) -> Result<usize> {
    let mut w = Writer::new(store);
    for comp in comps.iter() {
        let dir = format!("components/{}", comp.name);
        let mut kust = Kustomization::component();
        for (id, doc) in &comp.resources {
            let rel = resource_file(id);
            w.doc(format!("{dir}/{rel}"), doc)?;
            kust.resources.push(rel);
        }
        let mut patches = Vec::with_capacity(comp.patches.len());
        for (id, doc) in &comp.patches {
            let rel = resource_file(id);
            w.doc(format!("{dir}/{rel}"), doc)?;
            patches.push(rel);
        }
        kust.resources.sort();
        patches.sort();
        kust.patches = patches.into_iter().map(|path| Patch { path }).collect();
        w.kustomization(&dir, &kust)?;
    }
    for (id, cluster) in comps.clusters().iter() {
        let dir = overlay_dir(&cluster.name)?;
        let up = to_root(&dir);
        let mut kust = Kustomization::kustomization();
        kust.components = comps.cluster_components(id).into_iter().map(|n| format!("{up}components/{n}")).collect();
        w.kustomization(&dir, &kust)?;
    }
    info!(components = comps.len(), files = w.written.len(), "components written");
    Ok(w.written.len())
}

/// `charts/<chart>/...` plus one overlay per cluster rendering the chart with that cluster's values.
pub fn write_chart(store: &dyn Store, chart: &Chart<'_>) -> Result<usize> {
    let mut w = Writer::new(store);
    let meta = chart.meta();
    let dir = format!("charts/{}", meta.name);

    let chart_yaml = format!("apiVersion: v2\n{}", serde_yaml::to_string(meta)?);
    w.put(format!("{dir}/Chart.yaml"), chart_yaml.as_bytes())?;
    for (id, template) in chart.templates() {
        w.put(format!("{dir}/templates/{}", resource_file(id)), template.render().as_bytes())?;
    }
    w.put(format!("{dir}/templates/_helpers.tpl"), HELPERS_TPL.as_bytes())?;
    w.doc(format!("{dir}/values.yaml"), &chart.values())?;

    for (id, cluster) in chart.clusters().iter() {
        let overlay = overlay_dir(&cluster.name)?;
        let values = chart.instance(id).values_inline();
        let mut kust = Kustomization::kustomization();
        kust.helm_globals = Some(HelmGlobals { chart_home: format!("{}charts", to_root(&overlay)) });
        kust.helm_charts.push(HelmChart {
            name: meta.name.clone(),
            version: meta.version.clone(),
            release_name: None,
            values_inline: (!values.is_empty_container()).then_some(values),
        });
        w.kustomization(&overlay, &kust)?;
    }
    info!(chart = %meta.name, templates = chart.templates().len(), files = w.written.len(), "chart written");
    Ok(w.written.len())
}

/// Single-cluster output: documents as-is next to a kustomization listing them.
pub fn write_single(store: &dyn Store, resources: &ClusterResources) -> Result<usize> {
    let mut w = Writer::new(store);
    let mut kust = Kustomization::kustomization();
    for (id, docs) in &resources.resources {
        for doc in docs.values() {
            let rel = resource_file(id);
            w.doc(rel.clone(), doc)?;
            kust.resources.push(rel);
        }
    }
    kust.resources.sort();
    w.put("kustomization.yaml".into(), kust.to_yaml()?.as_bytes())?;
    info!(resources = resources.len(), "resources written");
    Ok(w.written.len())
}
