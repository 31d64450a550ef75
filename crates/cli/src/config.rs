use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use kfold_core::{GroupSelector, NodePath, Patterns};
use kfold_emit::ChartMeta;
use kfold_kubehub::ResourceSelector;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG: &str = "kfold.yaml";

/// Fields that differ per cluster by nature and never belong in shared output.
pub const DEFAULT_SKIP_FIELDS: &[&str] = &[
    "status",
    "metadata.uid",
    "metadata.resourceVersion",
    "metadata.creationTimestamp",
    "metadata.generation",
    "metadata.managedFields",
    "metadata.annotations[kubectl.kubernetes.io/last-applied-configuration]",
];

/// `kfold.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    /// Tags for preset naming.
    #[serde(default)]
    pub clusters: Vec<GroupSelector>,
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub resources: Vec<ResourceSelector>,
    #[serde(default)]
    pub skip: Skip,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Where cluster documents come from. Without `dir`, clusters are kubeconfig contexts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Source {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<PathBuf>,
    /// Restricts which snapshot directories or contexts take part.
    #[serde(default)]
    pub names: Patterns,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Skip {
    #[serde(default = "default_skip_fields")]
    pub fields: Vec<String>,
}

impl Default for Skip {
    fn default() -> Self { Self { fields: default_skip_fields() } }
}

fn default_skip_fields() -> Vec<String> { DEFAULT_SKIP_FIELDS.iter().map(|s| s.to_string()).collect() }

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    #[default]
    Components,
    Chart,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default)]
    pub kind: OutputKind,
    #[serde(default = "default_out_dir")]
    pub dir: PathBuf,
    #[serde(default)]
    pub chart: ChartMeta,
}

impl Default for OutputConfig {
    fn default() -> Self { Self { kind: OutputKind::default(), dir: default_out_dir(), chart: ChartMeta::default() } }
}

fn default_out_dir() -> PathBuf { PathBuf::from("out") }

impl Config {
    pub fn parse(text: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(text)?;
        if cfg.source.dir.is_some() && cfg.source.kubeconfig.is_some() {
            bail!("source: set either dir or kubeconfig, not both");
        }
        cfg.skip_paths()?;
        Ok(cfg)
    }

    /// Relative `source.dir` resolves against the config file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        let mut cfg = Self::parse(&text).with_context(|| format!("parsing config {}", path.display()))?;
        if let (Some(dir), Some(base)) = (cfg.source.dir.as_mut(), path.parent()) {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
        Ok(cfg)
    }

    pub fn skip_paths(&self) -> Result<Vec<NodePath>> {
        self.skip
            .fields
            .iter()
            .map(|f| f.parse::<NodePath>().with_context(|| format!("skip field {f:?}")))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_config() {
        let cfg = Config::parse(
            r#"
clusters:
  - names: ["prod-*"]
    tags: [prod]
source:
  dir: ./snapshots
  names: ["*", "-scratch"]
resources:
  - apiResources: [apps/v1/Deployment]
    namespaces: ["*"]
skip:
  fields: ["status", "metadata.uid"]
output:
  kind: chart
  dir: ./rendered
  chart: {name: myapp, version: 1.2.3}
"#,
        )
        .unwrap();
        assert_eq!(cfg.clusters[0].tags, vec!["prod"]);
        assert!(cfg.clusters[0].names.matches("prod-eu"));
        assert_eq!(cfg.source.dir.as_deref(), Some(Path::new("./snapshots")));
        assert!(!cfg.source.names.matches("scratch"));
        assert_eq!(cfg.skip_paths().unwrap().len(), 2);
        assert_eq!(cfg.output.kind, OutputKind::Chart);
        assert_eq!(cfg.output.chart.name, "myapp");
    }

    #[test]
    fn defaults() {
        let cfg = Config::parse("{}").unwrap();
        assert_eq!(cfg.output.kind, OutputKind::Components);
        assert_eq!(cfg.output.dir, PathBuf::from("out"));
        assert_eq!(cfg.skip.fields.len(), DEFAULT_SKIP_FIELDS.len());
        assert_eq!(cfg.skip_paths().unwrap().len(), DEFAULT_SKIP_FIELDS.len());
        assert!(cfg.source.names.matches("anything"));
    }

    #[test]
    fn rejects_ambiguous_source_and_unknown_keys() {
        assert!(Config::parse("source: {dir: a, kubeconfig: b}").is_err());
        assert!(Config::parse("outputs: {}").is_err());
    }

    #[test]
    fn relative_dirs_follow_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kfold.yaml");
        std::fs::write(&path, "source: {dir: snaps}\n").unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.source.dir.unwrap(), dir.path().join("snaps"));
    }
}
