use std::collections::{BTreeMap, BTreeSet, HashMap};

use kfold_align::{group_by_value, Aligner, Builder, NodeId, Shape};
use kfold_core::{ClusterDocs, ClusterId, ClusterIndex, Mapping, Node, NodeKind, NodePath, ResourceId, Scalar};
use kfold_schema::SchemaRegistry;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{EmitError, Result, Template};

/// Defines `merge_presets`: folds every preset listed in `.Values.presets` into `.Values.global`, keeping values
/// already set inline.
pub const HELPERS_TPL: &str = r#"{{- define "merge_presets" -}}
{{- $global := default dict .Values.global -}}
{{- range $preset := default list .Values.presets -}}
{{- $global = merge $global (default dict (index $.Values.preset_values $preset)) -}}
{{- end -}}
{{- $_ := set .Values "global" $global -}}
{{- end -}}
"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartMeta {
    pub name: String,
    pub version: String,
}

impl Default for ChartMeta {
    fn default() -> Self { Self { name: "kfold".into(), version: "0.1.0".into() } }
}

/// Values one cluster passes to the chart.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartInstance {
    /// Sorted.
    pub presets: Vec<String>,
    pub global: BTreeMap<String, Node>,
}

impl ChartInstance {
    /// `{presets: [...], global: {...}}`, each key present only when non-empty.
    pub fn values_inline(&self) -> Node {
        let mut root = Mapping::new();
        if !self.presets.is_empty() {
            root.insert("presets".into(), Node::Sequence(self.presets.iter().map(Node::str).collect()));
        }
        if !self.global.is_empty() {
            root.insert("global".into(), Node::Mapping(self.global.iter().map(|(k, v)| (k.clone(), v.clone())).collect()));
        }
        Node::Mapping(root)
    }
}

struct Mark {
    name: String,
    variable: Option<NodeKind>,
    conditional: bool,
}

/// Templated-chart emitter: one superset template per resource, divergent values split into presets shared by
/// named cluster groups and inline values private to one cluster.
pub struct Chart<'c> {
    meta: ChartMeta,
    clusters: &'c ClusterIndex,
    schemas: &'c SchemaRegistry,
    templates: BTreeMap<ResourceId, Template>,
    preset_values: BTreeMap<String, BTreeMap<String, Node>>,
    preset_members: BTreeMap<String, BTreeSet<ClusterId>>,
    inline_values: BTreeMap<ClusterId, BTreeMap<String, Node>>,
    cluster_presets: BTreeMap<ClusterId, BTreeSet<String>>,
}

/// `<ns>/<Kind>/<name>.<path>` without a leading `/` or trailing `.`.
pub(crate) fn variable_name(id: &ResourceId, path: &NodePath) -> String {
    let name = format!("{}/{}/{}.{}", id.namespace.as_deref().unwrap_or(""), id.kind, id.name, path);
    name.trim_start_matches('/').trim_end_matches('.').to_string()
}

impl<'c> Chart<'c> {
    pub fn new(meta: ChartMeta, clusters: &'c ClusterIndex, schemas: &'c SchemaRegistry) -> Self {
        Self {
            meta,
            clusters,
            schemas,
            templates: BTreeMap::new(),
            preset_values: BTreeMap::new(),
            preset_members: BTreeMap::new(),
            inline_values: BTreeMap::new(),
            cluster_presets: BTreeMap::new(),
        }
    }

    pub fn meta(&self) -> &ChartMeta { &self.meta }
    pub fn clusters(&self) -> &ClusterIndex { self.clusters }
    pub fn templates(&self) -> &BTreeMap<ResourceId, Template> { &self.templates }
    pub fn preset_values(&self) -> &BTreeMap<String, BTreeMap<String, Node>> { &self.preset_values }

    /// Build the template of `id` and record its values. Nothing is recorded unless the whole resource aligns.
    pub fn add(&mut self, id: &ResourceId, docs: &ClusterDocs) -> Result<()> {
        if self.templates.contains_key(id) {
            return Err(EmitError::DuplicateResource(id.clone()));
        }
        if docs.is_empty() {
            return Err(EmitError::Empty(id.clone()));
        }
        if let Some(unknown) = docs.keys().find(|c| self.clusters.get(**c).is_none()) {
            return Err(EmitError::UnknownCluster(*unknown));
        }

        let schema = self.schemas.resolve(id);
        let mut builder = Builder::for_resource(id);
        let mut occurrences = vec![self.clusters.len()];
        let mut marks: HashMap<NodeId, Mark> = HashMap::new();
        let mut staged: Vec<(Vec<ClusterId>, String, Node)> = Vec::new();

        for frame in Aligner::new(docs, schema.as_deref()) {
            let frame = frame.map_err(|source| EmitError::Align { id: id.clone(), source })?;
            let depth = frame.path().len();
            occurrences.truncate(depth + 1);
            occurrences.push(frame.cluster_count());
            let optional = occurrences[depth + 1] < occurrences[depth];
            let name = variable_name(id, frame.path());

            let mut groups = group_by_value(frame.values());
            let variable = if groups.len() == 1 {
                if optional {
                    staged.push((groups[0].clusters.clone(), name.clone(), Node::Scalar(Scalar::bool(true))));
                }
                None
            } else {
                for g in &groups {
                    staged.push((g.clusters.clone(), name.clone(), g.value.clone()));
                }
                Some(frame.kind())
            };
            let value = groups.swap_remove(0).value;

            let node = builder.set(frame.path(), value).map_err(|source| EmitError::Build { id: id.clone(), source })?;
            if variable.is_some() || optional {
                marks.insert(node, Mark { name, variable, conditional: optional });
            }
        }

        let mut pending: BTreeMap<String, BTreeSet<ClusterId>> = BTreeMap::new();
        let mut scopes = Vec::with_capacity(staged.len());
        for (ids, _, _) in &staged {
            let scope = self.scope_of(ids)?;
            if let Scope::Preset(preset) = &scope {
                let set: BTreeSet<ClusterId> = ids.iter().copied().collect();
                if *pending.entry(preset.clone()).or_insert_with(|| set.clone()) != set {
                    return Err(EmitError::NameCollision { name: preset.clone() });
                }
            }
            scopes.push(scope);
        }

        let template = builder.fold(&mut |node, shape| {
            let plain = match shape {
                Shape::Leaf(n) => Template::from(n),
                Shape::Mapping(entries) => Template::Mapping(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()),
                Shape::Sequence(items) => Template::Sequence(items),
            };
            let Some(mark) = marks.get(&node) else { return plain };
            let body = match mark.variable {
                Some(kind) => Template::Variable { name: mark.name.clone(), kind },
                None => plain,
            };
            if mark.conditional {
                Template::Conditional { flag: mark.name.clone(), body: Box::new(body) }
            } else {
                body
            }
        });

        let variables = marks.values().filter(|m| m.variable.is_some()).count();
        debug!(resource = %id, variables, flags = marks.len() - variables, values = staged.len(), "resource templated");
        counter!("chart_variables_total", variables as u64);
        counter!("chart_values_total", staged.len() as u64);

        self.templates.insert(id.clone(), template);
        for (scope, (ids, name, value)) in scopes.into_iter().zip(staged) {
            self.scope(scope, &ids).insert(name, value);
        }
        Ok(())
    }

    /// Where values shared by `ids` live: the first cluster's inline values when the group is named after it,
    /// else a preset. Fails when the preset name already stands for a different cluster set.
    fn scope_of(&self, ids: &[ClusterId]) -> Result<Scope> {
        let preset = self.clusters.group(ids.iter().copied());
        if let Some(&first) = ids.first().filter(|c| self.clusters.name(**c) == Some(preset.as_str())) {
            return Ok(Scope::Inline(first));
        }
        let set: BTreeSet<ClusterId> = ids.iter().copied().collect();
        match self.preset_members.get(&preset) {
            Some(members) if *members != set => Err(EmitError::NameCollision { name: preset }),
            _ => Ok(Scope::Preset(preset)),
        }
    }

    fn scope(&mut self, scope: Scope, ids: &[ClusterId]) -> &mut BTreeMap<String, Node> {
        match scope {
            Scope::Inline(cluster) => self.inline_values.entry(cluster).or_default(),
            Scope::Preset(preset) => {
                for id in ids {
                    self.cluster_presets.entry(*id).or_default().insert(preset.clone());
                }
                self.preset_members.entry(preset.clone()).or_insert_with(|| ids.iter().copied().collect());
                self.preset_values.entry(preset).or_default()
            }
        }
    }

    /// Chart `values.yaml`: an empty `global` and every preset, keys sorted.
    pub fn values(&self) -> Node {
        let presets: Mapping = self
            .preset_values
            .iter()
            .map(|(preset, vars)| (preset.clone(), Node::Mapping(vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect())))
            .collect();
        let mut root = Mapping::new();
        root.insert("global".into(), Node::default());
        root.insert("preset_values".into(), Node::Mapping(presets));
        Node::Mapping(root)
    }

    /// Presets and inline values for one cluster.
    pub fn instance(&self, cluster: ClusterId) -> ChartInstance {
        ChartInstance {
            presets: self.cluster_presets.get(&cluster).map(|p| p.iter().cloned().collect()).unwrap_or_default(),
            global: self.inline_values.get(&cluster).cloned().unwrap_or_default(),
        }
    }
}

enum Scope {
    Inline(ClusterId),
    Preset(String),
}
