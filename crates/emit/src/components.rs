use std::collections::{BTreeMap, BTreeSet};

use kfold_align::{group_by_value, Aligner, Builder};
use kfold_core::{ClusterDocs, ClusterId, ClusterIndex, Node, ResourceId};
use kfold_schema::SchemaRegistry;
use metrics::counter;
use tracing::debug;

use crate::{EmitError, Result};

/// A kustomize component: full resources for the cluster sets it owns, patches where a subset diverges.
#[derive(Debug, Clone, Default)]
pub struct Component {
    pub name: String,
    pub clusters: BTreeSet<ClusterId>,
    pub resources: BTreeMap<ResourceId, Node>,
    pub patches: BTreeMap<ResourceId, Node>,
}

impl Component {
    fn new(name: String, clusters: BTreeSet<ClusterId>) -> Self {
        Self { name, clusters, ..Self::default() }
    }
}

/// Component/overlay emitter.
///
/// Every resource gets a base document in the component named for the clusters holding it; every frame value
/// shared by fewer clusters lands in the patch of the component named for exactly those clusters.
pub struct Components<'c> {
    clusters: &'c ClusterIndex,
    schemas: &'c SchemaRegistry,
    components: BTreeMap<String, Component>,
    seen: BTreeSet<ResourceId>,
}

impl<'c> Components<'c> {
    pub fn new(clusters: &'c ClusterIndex, schemas: &'c SchemaRegistry) -> Self {
        Self { clusters, schemas, components: BTreeMap::new(), seen: BTreeSet::new() }
    }

    pub fn clusters(&self) -> &ClusterIndex { self.clusters }

    /// Fold the documents of `id` into base and patches. Nothing is recorded unless the whole resource aligns.
    pub fn add(&mut self, id: &ResourceId, docs: &ClusterDocs) -> Result<()> {
        if self.seen.contains(id) {
            return Err(EmitError::DuplicateResource(id.clone()));
        }
        if docs.is_empty() {
            return Err(EmitError::Empty(id.clone()));
        }
        if let Some(unknown) = docs.keys().find(|c| self.clusters.get(**c).is_none()) {
            return Err(EmitError::UnknownCluster(*unknown));
        }

        let main: BTreeSet<ClusterId> = docs.keys().copied().collect();
        let main_name = self.clusters.group(main.iter().copied());
        let schema = self.schemas.resolve(id);
        let mut base = Builder::for_resource(id);
        let mut patches: BTreeMap<String, (BTreeSet<ClusterId>, Builder)> = BTreeMap::new();
        let mut frames = 0u64;

        for frame in Aligner::new(docs, schema.as_deref()) {
            let frame = frame.map_err(|source| EmitError::Align { id: id.clone(), source })?;
            frames += 1;
            for group in group_by_value(frame.values()) {
                let builder = if group.clusters.len() == main.len() {
                    &mut base
                } else {
                    let set: BTreeSet<ClusterId> = group.clusters.iter().copied().collect();
                    let name = self.clusters.group(set.iter().copied());
                    let (owners, builder) = patches.entry(name.clone()).or_insert_with(|| (set.clone(), Builder::for_resource(id)));
                    if *owners != set || name == main_name {
                        return Err(EmitError::NameCollision { name });
                    }
                    builder
                };
                builder.set(frame.path(), group.value).map_err(|source| EmitError::Build { id: id.clone(), source })?;
            }
        }

        self.check_owner(&main_name, &main)?;
        for (name, (set, _)) in &patches {
            self.check_owner(name, set)?;
        }

        debug!(resource = %id, frames, component = %main_name, patches = patches.len(), hits = base.hits(), misses = base.misses(), "resource split into components");
        counter!("emit_frames_total", frames);
        counter!("emit_patches_total", patches.len() as u64);

        self.seen.insert(id.clone());
        self.component(main_name, main).resources.insert(id.clone(), base.build());
        for (name, (set, builder)) in patches {
            self.component(name, set).patches.insert(id.clone(), builder.build());
        }
        Ok(())
    }

    fn check_owner(&self, name: &str, set: &BTreeSet<ClusterId>) -> Result<()> {
        match self.components.get(name) {
            Some(existing) if existing.clusters != *set => Err(EmitError::NameCollision { name: name.to_string() }),
            _ => Ok(()),
        }
    }

    fn component(&mut self, name: String, set: BTreeSet<ClusterId>) -> &mut Component {
        self.components.entry(name.clone()).or_insert_with(|| {
            counter!("emit_components_total", 1u64);
            Component::new(name, set)
        })
    }

    pub fn get(&self, name: &str) -> Option<&Component> { self.components.get(name) }

    /// Components ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = &Component> + '_ { self.components.values() }

    pub fn len(&self) -> usize { self.components.len() }
    pub fn is_empty(&self) -> bool { self.components.is_empty() }

    /// Names of the components a cluster's overlay includes: widest first, then by name.
    pub fn cluster_components(&self, cluster: ClusterId) -> Vec<&str> {
        let mut owned: Vec<&Component> = self.components.values().filter(|c| c.clusters.contains(&cluster)).collect();
        owned.sort_by(|a, b| b.clusters.len().cmp(&a.clusters.len()).then_with(|| a.name.cmp(&b.name)));
        owned.into_iter().map(|c| c.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kfold_core::{Cluster, ClusterIndex};

    fn index(names: &[&str]) -> ClusterIndex {
        let mut idx = ClusterIndex::new();
        for n in names {
            idx.add(Cluster::new(*n));
        }
        idx
    }

    fn docs(items: &[(u32, &str)]) -> ClusterDocs {
        items.iter().map(|(c, s)| (ClusterId(*c), Node::parse(s).unwrap())).collect()
    }

    fn id() -> ResourceId { ResourceId::new("v1", "ConfigMap", Some("ns"), "cm") }

    const HEAD: &str = "apiVersion: v1\nkind: ConfigMap\nmetadata: {name: cm, namespace: ns}\n";

    #[test]
    fn shared_values_go_to_base() {
        let idx = index(&["a", "b", "c"]);
        let schemas = SchemaRegistry::new();
        let mut comps = Components::new(&idx, &schemas);
        let d = docs(&[
            (0, &format!("{HEAD}data: {{x: '1', y: a}}\n")),
            (1, &format!("{HEAD}data: {{x: '1', y: b}}\n")),
            (2, &format!("{HEAD}data: {{x: '1', y: b}}\n")),
        ]);
        comps.add(&id(), &d).unwrap();

        let names: Vec<&str> = comps.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "all-clusters", "b_c"]);
        let base = &comps.get("all-clusters").unwrap().resources[&id()];
        assert_eq!(base.to_flow(), "{apiVersion: v1, kind: ConfigMap, metadata: {name: cm, namespace: ns}, data: {x: '1'}}");
        let patch = &comps.get("b_c").unwrap().patches[&id()];
        assert_eq!(patch.to_flow(), "{apiVersion: v1, kind: ConfigMap, metadata: {name: cm, namespace: ns}, data: {y: b}}");
        assert_eq!(comps.cluster_components(ClusterId(1)), vec!["all-clusters", "b_c"]);
    }

    #[test]
    fn partial_resources_are_based_on_their_holders() {
        let idx = index(&["a", "b", "c"]);
        let schemas = SchemaRegistry::new();
        let mut comps = Components::new(&idx, &schemas);
        comps.add(&id(), &docs(&[(0, HEAD), (2, HEAD)])).unwrap();
        assert!(comps.get("a_c").unwrap().resources.contains_key(&id()));
        assert!(comps.cluster_components(ClusterId(1)).is_empty());
    }

    #[test]
    fn duplicates_and_misalignment_leave_no_trace() {
        let idx = index(&["a", "b"]);
        let schemas = SchemaRegistry::new();
        let mut comps = Components::new(&idx, &schemas);
        let bad = docs(&[(0, &format!("{HEAD}data: {{x: '1'}}\n")), (1, &format!("{HEAD}data: [1]\n"))]);
        assert!(matches!(comps.add(&id(), &bad), Err(EmitError::Align { .. })));
        assert!(comps.is_empty());

        comps.add(&id(), &docs(&[(0, HEAD)])).unwrap();
        assert!(matches!(comps.add(&id(), &docs(&[(1, HEAD)])), Err(EmitError::DuplicateResource(_))));
        assert!(matches!(comps.add(&id(), &ClusterDocs::new()), Err(EmitError::DuplicateResource(_))));
    }

    #[test]
    fn unknown_clusters_are_rejected() {
        let idx = index(&["a"]);
        let schemas = SchemaRegistry::new();
        let mut comps = Components::new(&idx, &schemas);
        assert!(matches!(comps.add(&id(), &docs(&[(4, HEAD)])), Err(EmitError::UnknownCluster(ClusterId(4)))));
    }
}
