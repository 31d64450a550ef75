//! kfold persistence: writes emitted artifacts as a kustomize tree, either on disk or in memory.
//! Paths are relative, `/`-separated and reproducible.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use kfold_core::ResourceId;
use metrics::{counter, histogram};

mod kustomize;
mod layout;

pub use kustomize::{HelmChart, HelmGlobals, Kustomization, Patch};
pub use layout::{write_chart, write_components, write_single};

pub trait Store {
    /// Write `bytes` at `rel`, replacing any previous content.
    fn write(&self, rel: &str, bytes: &[u8]) -> Result<()>;
}

/// `<ns>/<name>-<kind>.yaml`, lowercased, without the namespace directory for cluster-scoped resources.
pub fn resource_file(id: &ResourceId) -> String {
    let file = format!("{}-{}.yaml", id.name, id.kind).to_lowercase();
    match &id.namespace {
        Some(ns) => format!("{ns}/{file}"),
        None => file,
    }
}

fn checked(rel: &str) -> Result<&Path> {
    let path = Path::new(rel);
    if rel.is_empty() || !path.components().all(|c| matches!(c, Component::Normal(_))) {
        bail!("refusing to write outside the output root: {rel:?}");
    }
    Ok(path)
}

/// Files under a root directory; parents are created on demand.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).with_context(|| format!("creating output dir {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path { &self.root }
}

impl Store for DirStore {
    fn write(&self, rel: &str, bytes: &[u8]) -> Result<()> {
        let started = std::time::Instant::now();
        let path = self.root.join(checked(rel)?);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
        histogram!("persist_write_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_write_total", 1u64);
        counter!("persist_write_bytes_total", bytes.len() as u64);
        Ok(())
    }
}

/// Ordered in-memory store; used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemStore {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Self { Self::default() }

    fn files(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, rel: &str) -> Option<String> { self.files().get(rel).map(|b| String::from_utf8_lossy(b).into_owned()) }

    /// Stored paths, sorted.
    pub fn paths(&self) -> Vec<String> { self.files().keys().cloned().collect() }

    pub fn len(&self) -> usize { self.files().len() }
    pub fn is_empty(&self) -> bool { self.files().is_empty() }

    pub fn into_inner(self) -> BTreeMap<String, Vec<u8>> {
        self.files.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Store for MemStore {
    fn write(&self, rel: &str, bytes: &[u8]) -> Result<()> {
        checked(rel)?;
        self.files().insert(rel.to_string(), bytes.to_vec());
        Ok(())
    }
}
