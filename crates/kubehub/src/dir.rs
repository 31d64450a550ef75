use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use kfold_core::{Cluster, Node, ResourceId};
use metrics::counter;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::{selected, Fetch, ResourceSelector};

/// Reads snapshots from `<root>/<cluster>/**/*.yaml`; every file may hold several documents, and `kind: List`
/// documents (as printed by `kubectl get -o yaml`) contribute their items.
///
/// Label selectors need an API server and are ignored here.
#[derive(Debug, Clone)]
pub struct DirFetcher {
    root: PathBuf,
}

impl DirFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }

    pub fn root(&self) -> &Path { &self.root }

    /// Cluster names: the sorted subdirectories of the root.
    pub async fn clusters(&self) -> Result<Vec<String>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let mut names = Vec::new();
            for entry in WalkDir::new(&root).min_depth(1).max_depth(1).sort_by_file_name() {
                let entry = entry.with_context(|| format!("reading {}", root.display()))?;
                if entry.file_type().is_dir() {
                    names.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
            Ok(names)
        })
        .await?
    }
}

/// Every `.yaml`/`.yml` file below `dir`, sorted by path.
async fn yaml_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&dir).follow_links(true).sort_by_file_name() {
            let entry = entry.with_context(|| format!("reading {}", dir.display()))?;
            let is_yaml = matches!(entry.path().extension().and_then(|e| e.to_str()), Some("yaml" | "yml"));
            if entry.file_type().is_file() && is_yaml {
                files.push(entry.into_path());
            }
        }
        files.sort();
        Ok(files)
    })
    .await?
}

/// Documents with every `kind: List` replaced by its items.
fn expand_lists(docs: Vec<Node>, file: &Path) -> Vec<Node> {
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        if doc.get_str("kind") != Some("List") {
            out.push(doc);
            continue;
        }
        let items = doc.get("items").and_then(Node::as_sequence).unwrap_or_default();
        debug!(file = %file.display(), items = items.len(), "expanding list");
        out.extend(items.iter().cloned());
    }
    out
}

#[async_trait::async_trait]
impl Fetch for DirFetcher {
    async fn fetch(&self, cluster: &Cluster, selectors: &[ResourceSelector]) -> Result<Vec<Node>> {
        let base = self.root.join(&cluster.name);
        let mut out = Vec::new();
        for file in yaml_files(&base).await? {
            let text = tokio::fs::read_to_string(&file).await.with_context(|| format!("reading {}", file.display()))?;
            let docs = Node::parse_all(&text).with_context(|| format!("parsing {}", file.display()))?;
            for doc in expand_lists(docs, &file) {
                match ResourceId::from_node(&doc) {
                    Ok(id) if selected(selectors, &id) => out.push(doc),
                    Ok(id) => debug!(resource = %id, "not selected"),
                    Err(e) => {
                        counter!("fetch_skipped_docs_total", 1u64);
                        warn!(file = %file.display(), error = %e, "skipping document without identity");
                    }
                }
            }
        }
        debug!(cluster = %cluster.name, docs = out.len(), "snapshot read");
        Ok(out)
    }
}
