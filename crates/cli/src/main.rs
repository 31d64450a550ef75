//! kfoldctl: fold the resources of several clusters into kustomize components or a Helm chart with presets.

#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use kfold_align::{group_by_value, leaves, strategic_merge, Aligner};
use kfold_core::{groups_of, ClusterId, ClusterIndex, ClusterResources};
use kfold_emit::{Chart, Components};
use kfold_kubehub::{collect, DirFetcher, Fetch, KubeFetcher};
use kfold_persist::{write_chart, write_components, write_single, DirStore, Store};
use kfold_schema::{fetch_crd_schemas, CrdSchemas, SchemaRegistry};
use metrics::histogram;
use serde::Serialize;
use tracing::{debug, info, warn};

mod config;

use config::{Config, OutputKind, DEFAULT_CONFIG};

#[derive(Parser, Debug)]
#[command(name = "kfoldctl", version, about = "Fold per-cluster Kubernetes resources into shared output")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Config file
    #[arg(short = 'c', long = "config", global = true, env = "KFOLD_CONFIG", default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch every cluster and write the folded output
    Run {
        /// Output directory (overrides output.dir)
        #[arg(long = "out")]
        out: Option<PathBuf>,
        /// Check that base plus patches rebuild every cluster's documents
        #[arg(long = "verify", action = ArgAction::SetTrue)]
        verify: bool,
    },
    /// Print the aligned frames of one resource and how clusters group per value
    Align {
        /// Resource as `namespace/Kind/name`; cluster-scoped ones start with `/`
        resource: String,
    },
    /// List clusters with their ids, tags and tag groups
    Clusters,
}

fn init_tracing() {
    let env = std::env::var("KFOLD_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KFOLD_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KFOLD_METRICS_ADDR; expected host:port");
        }
    }
}

/// The configured document source plus the cluster names it serves.
enum Source {
    Dir(DirFetcher),
    Kube(KubeFetcher),
}

impl Source {
    fn from_config(cfg: &Config) -> Self {
        match &cfg.source.dir {
            Some(dir) => Source::Dir(DirFetcher::new(dir)),
            None => Source::Kube(KubeFetcher::new(cfg.source.kubeconfig.clone())),
        }
    }

    fn fetcher(&self) -> &dyn Fetch {
        match self {
            Source::Dir(f) => f,
            Source::Kube(f) => f,
        }
    }

    async fn cluster_names(&self, cfg: &Config) -> Result<Vec<String>> {
        let all = match self {
            Source::Dir(f) => f.clusters().await?,
            Source::Kube(f) => f.contexts()?,
        };
        Ok(all.into_iter().filter(|n| cfg.source.names.matches(n)).collect())
    }

    /// CRD schemas: listed from every context, or read from CRD documents in the snapshot.
    async fn crd_schemas(&self, index: &ClusterIndex, resources: &ClusterResources) -> Result<CrdSchemas> {
        match self {
            Source::Kube(f) => {
                let mut merged = CrdSchemas::new();
                for (_, cluster) in index.iter() {
                    let client = f.client(&cluster.name).await?;
                    let crds = fetch_crd_schemas(client).await.with_context(|| format!("CRDs of {}", cluster.name))?;
                    merged.extend(crds);
                }
                Ok(merged)
            }
            Source::Dir(_) => {
                let docs = resources
                    .resources
                    .iter()
                    .filter(|(id, _)| id.kind == "CustomResourceDefinition")
                    .flat_map(|(_, docs)| docs.values())
                    .map(serde_json::to_value)
                    .collect::<Result<Vec<_>, _>>()?;
                let mut crds = CrdSchemas::new();
                crds.add_documents(&docs)?;
                Ok(crds)
            }
        }
    }
}

fn cluster_index(cfg: &Config, names: Vec<String>) -> Result<ClusterIndex> {
    if names.is_empty() {
        bail!("no clusters selected");
    }
    Ok(ClusterIndex::build(names, &cfg.clusters))
}

/// Fetch, strip skipped fields and load schemas for every selected cluster.
async fn gather(cfg: &Config) -> Result<(ClusterResources, SchemaRegistry)> {
    let source = Source::from_config(cfg);
    let index = cluster_index(cfg, source.cluster_names(cfg).await?)?;
    info!(clusters = index.len(), "collecting resources");
    let skip = cfg.skip_paths()?;
    let resources = collect(&index, source.fetcher(), &cfg.resources, &skip).await?;
    let crds = source.crd_schemas(&index, &resources).await?;
    debug!(crd_types = crds.len(), "schemas loaded");
    Ok((resources, SchemaRegistry::with_builtin().with_source(crds)))
}

/// Fold `resources` into the configured layout and write it to `store`. Returns the number of files written.
fn fold(cfg: &Config, resources: &ClusterResources, schemas: &SchemaRegistry, store: &dyn Store) -> Result<usize> {
    let index = &resources.clusters;
    if index.len() == 1 {
        return write_single(store, resources);
    }
    match cfg.output.kind {
        OutputKind::Components => {
            let comps = components(resources, schemas)?;
            write_components(store, &comps)
        }
        OutputKind::Chart => {
            let mut chart = Chart::new(cfg.output.chart.clone(), index, schemas);
            for (id, docs) in &resources.resources {
                chart.add(id, docs).with_context(|| format!("templating {id}"))?;
            }
            write_chart(store, &chart)
        }
    }
}

fn components<'c>(resources: &'c ClusterResources, schemas: &'c SchemaRegistry) -> Result<Components<'c>> {
    let mut comps = Components::new(&resources.clusters, schemas);
    for (id, docs) in &resources.resources {
        comps.add(id, docs).with_context(|| format!("folding {id}"))?;
    }
    Ok(comps)
}

/// Rebuild every cluster's documents from its components and compare leaves with the input.
fn verify(resources: &ClusterResources, schemas: &SchemaRegistry) -> Result<usize> {
    let comps = components(resources, schemas)?;
    let mut checked = 0;
    for (id, docs) in &resources.resources {
        let schema = schemas.resolve(id);
        for (cluster, original) in docs {
            let names = comps.cluster_components(*cluster);
            let mut doc = names
                .iter()
                .find_map(|n| comps.get(n).and_then(|c| c.resources.get(id)))
                .cloned()
                .with_context(|| format!("{id}: no base document for cluster {cluster}"))?;
            for name in &names {
                if let Some(patch) = comps.get(name).and_then(|c| c.patches.get(id)) {
                    strategic_merge(&mut doc, patch, schema.as_deref());
                }
            }
            if leaves(&doc, schema.as_deref())? != leaves(original, schema.as_deref())? {
                bail!("{id} does not rebuild for cluster {cluster}");
            }
            checked += 1;
        }
    }
    Ok(checked)
}

#[derive(Serialize)]
struct FrameRow {
    path: String,
    kind: String,
    clusters: usize,
    groups: Vec<GroupRow>,
}

#[derive(Serialize)]
struct GroupRow {
    clusters: Vec<String>,
    value: String,
}

fn align_rows(resources: &ClusterResources, schemas: &SchemaRegistry, resource: &str) -> Result<Vec<FrameRow>> {
    let (id, docs) = resources
        .resources
        .iter()
        .find(|(id, _)| id.to_string() == resource)
        .with_context(|| format!("resource {resource} not found"))?;
    let schema = schemas.resolve(id);
    let index = &resources.clusters;
    let mut rows = Vec::new();
    for frame in Aligner::new(docs, schema.as_deref()) {
        let frame = frame.with_context(|| format!("aligning {id}"))?;
        let groups = if frame.is_leaf() {
            group_by_value(frame.values())
                .into_iter()
                .map(|g| GroupRow {
                    clusters: g.clusters.iter().filter_map(|c| index.name(*c)).map(str::to_string).collect(),
                    value: g.value.to_flow(),
                })
                .collect()
        } else {
            Vec::new()
        };
        rows.push(FrameRow { path: frame.path().to_string(), kind: frame.kind().to_string(), clusters: frame.cluster_count(), groups });
    }
    Ok(rows)
}

#[derive(Serialize)]
struct ClusterRow {
    id: u32,
    name: String,
    tags: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let mut cfg = Config::load(&cli.config)?;

    match cli.command {
        Commands::Run { out, verify: check } => {
            let started = Instant::now();
            if let Some(out) = out {
                cfg.output.dir = out;
            }
            let (resources, schemas) = gather(&cfg).await?;
            if check && resources.clusters.len() > 1 {
                let checked = verify(&resources, &schemas)?;
                info!(documents = checked, "verified");
            } else if check {
                warn!("single cluster; nothing to verify");
            }
            let store = DirStore::open(&cfg.output.dir)?;
            let files = fold(&cfg, &resources, &schemas, &store)?;
            histogram!("run_ms", started.elapsed().as_secs_f64() * 1000.0);
            match cli.output {
                Output::Human => println!("{} resources, {} files written to {}", resources.len(), files, cfg.output.dir.display()),
                Output::Json => println!(
                    "{}",
                    serde_json::json!({"resources": resources.len(), "files": files, "dir": cfg.output.dir})
                ),
            }
        }
        Commands::Align { resource } => {
            let (resources, schemas) = gather(&cfg).await?;
            let rows = align_rows(&resources, &schemas, &resource)?;
            match cli.output {
                Output::Human => {
                    for row in &rows {
                        println!("{} {} [{}]", row.path, row.kind, row.clusters);
                        for g in &row.groups {
                            println!("    {}: {}", g.clusters.join(","), g.value);
                        }
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
            }
        }
        Commands::Clusters => {
            let source = Source::from_config(&cfg);
            let index = cluster_index(&cfg, source.cluster_names(&cfg).await?)?;
            let rows: Vec<ClusterRow> = index
                .iter()
                .map(|(id, c)| ClusterRow { id: id.0, name: c.name.clone(), tags: c.tags.iter().cloned().collect() })
                .collect();
            let all: BTreeSet<ClusterId> = index.ids().collect();
            match cli.output {
                Output::Human => {
                    println!("ID  NAME                 TAGS");
                    for r in &rows {
                        println!("{:<3} {:<20} {}", r.id, r.name, r.tags.join(","));
                    }
                    for (tag, members) in groups_of(&index, &all) {
                        let names: Vec<&str> = members.iter().filter_map(|c| index.name(*c)).collect();
                        println!("group {tag}: {}", names.join(","));
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kfold_core::Node;
    use kfold_persist::MemStore;
    use std::fs;

    fn deployment(replicas: u32, image: &str) -> String {
        format!(
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\n  namespace: shop\n  uid: x-{replicas}\nspec:\n  replicas: {replicas}\n  template:\n    spec:\n      containers:\n      - name: app\n        image: {image}\nstatus:\n  readyReplicas: {replicas}\n"
        )
    }

    fn snapshot(clusters: &[(&str, u32, &str)]) -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        for (name, replicas, image) in clusters {
            let d = dir.path().join(name);
            fs::create_dir_all(&d).unwrap();
            fs::write(d.join("web.yaml"), deployment(*replicas, image)).unwrap();
        }
        let cfg = Config::parse(&format!(
            "clusters:\n- names: ['prod-*']\n  tags: [prod]\nsource:\n  dir: {}\n",
            dir.path().display()
        ))
        .unwrap();
        (dir, cfg)
    }

    #[tokio::test]
    async fn components_from_snapshots() {
        let (_dir, cfg) = snapshot(&[("dev", 1, "app:v2"), ("prod-a", 3, "app:v1"), ("prod-b", 3, "app:v1")]);
        let (resources, schemas) = gather(&cfg).await.unwrap();
        assert_eq!(verify(&resources, &schemas).unwrap(), 3);

        let store = MemStore::new();
        fold(&cfg, &resources, &schemas, &store).unwrap();
        let base = Node::parse(&store.get("components/all-clusters/shop/web-deployment.yaml").unwrap()).unwrap();
        assert!(base.get("status").is_none());
        assert!(base.get("metadata").and_then(|m| m.get("uid")).is_none());
        let prod = Node::parse(&store.get("components/prod/shop/web-deployment.yaml").unwrap()).unwrap();
        assert_eq!(prod.get("spec").and_then(|s| s.get_str("replicas")), Some("3"));
        assert!(store.get("overlays/dev/kustomization.yaml").unwrap().contains("../../components/dev"));
    }

    #[tokio::test]
    async fn chart_from_snapshots() {
        let (_dir, mut cfg) = snapshot(&[("dev", 1, "app:v2"), ("prod-a", 3, "app:v1"), ("prod-b", 3, "app:v1")]);
        cfg.output.kind = OutputKind::Chart;
        let (resources, schemas) = gather(&cfg).await.unwrap();
        let store = MemStore::new();
        fold(&cfg, &resources, &schemas, &store).unwrap();
        assert!(store.get("charts/kfold/templates/shop/web-deployment.yaml").is_some());
        let prod = store.get("overlays/prod-a/kustomization.yaml").unwrap();
        assert!(prod.contains("- prod"));
    }

    #[tokio::test]
    async fn single_cluster_is_written_as_is() {
        let (_dir, cfg) = snapshot(&[("only", 2, "app:v1")]);
        let (resources, schemas) = gather(&cfg).await.unwrap();
        let store = MemStore::new();
        assert_eq!(fold(&cfg, &resources, &schemas, &store).unwrap(), 2);
        assert_eq!(store.paths(), vec!["kustomization.yaml", "shop/web-deployment.yaml"]);
    }

    #[tokio::test]
    async fn align_reports_value_groups() {
        let (_dir, cfg) = snapshot(&[("dev", 1, "app:v2"), ("prod-a", 3, "app:v1"), ("prod-b", 3, "app:v1")]);
        let (resources, schemas) = gather(&cfg).await.unwrap();
        let rows = align_rows(&resources, &schemas, "shop/Deployment/web").unwrap();
        let replicas = rows.iter().find(|r| r.path == "spec.replicas").unwrap();
        assert_eq!(replicas.groups.len(), 2);
        assert_eq!(replicas.groups[0].clusters, vec!["prod-a", "prod-b"]);
        assert_eq!(replicas.groups[1].value, "1");
        assert!(align_rows(&resources, &schemas, "shop/Deployment/missing").is_err());
    }

    #[test]
    fn no_clusters_is_an_error() {
        assert!(cluster_index(&Config::default(), Vec::new()).is_err());
    }
}
