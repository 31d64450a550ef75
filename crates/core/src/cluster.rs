use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use globset::{GlobBuilder, GlobMatcher};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::naming::{name_for, KnownGroups};
use crate::Error;

/// Name used for a cluster set covering every registered cluster.
pub const ALL_CLUSTERS: &str = "all-clusters";

/// Dense cluster identifier, assigned in registration order and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterId(pub u32);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "#{}", self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl Cluster {
    pub fn new(name: impl Into<String>) -> Self { Self { name: name.into(), tags: BTreeSet::new() } }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

/// Bijection between clusters and their ids, plus the tag groups used for preset naming.
#[derive(Debug, Clone, Default)]
pub struct ClusterIndex {
    clusters: Vec<Cluster>,
    by_name: HashMap<String, ClusterId>,
    tags: KnownGroups,
}

impl ClusterIndex {
    pub fn new() -> Self { Self::default() }

    /// Register `cluster`. Re-adding a known name merges its tags and keeps the original id.
    pub fn add(&mut self, cluster: Cluster) -> ClusterId {
        let id = match self.by_name.get(&cluster.name) {
            Some(id) => {
                self.clusters[id.0 as usize].tags.extend(cluster.tags.iter().cloned());
                *id
            }
            None => {
                let id = ClusterId(self.clusters.len() as u32);
                self.by_name.insert(cluster.name.clone(), id);
                self.clusters.push(cluster.clone());
                id
            }
        };
        for tag in cluster.tags {
            self.tags.entry(tag).or_default().insert(id);
        }
        id
    }

    /// Register `names` (sorted, deduplicated) tagged by every selector whose patterns match them.
    pub fn build<I, S>(names: I, selectors: &[GroupSelector]) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        let mut index = Self::new();
        for name in names {
            let tags: Vec<String> =
                selectors.iter().filter(|s| s.names.matches(&name)).flat_map(|s| s.tags.iter().cloned()).collect();
            let cluster = Cluster::new(name).with_tags(tags);
            index.add(cluster);
        }
        index
    }

    pub fn id(&self, name: &str) -> crate::Result<ClusterId> {
        self.by_name.get(name).copied().ok_or_else(|| Error::UnknownCluster(name.to_string()))
    }

    pub fn get(&self, id: ClusterId) -> Option<&Cluster> { self.clusters.get(id.0 as usize) }

    pub fn name(&self, id: ClusterId) -> Option<&str> { self.get(id).map(|c| c.name.as_str()) }

    pub fn len(&self) -> usize { self.clusters.len() }
    pub fn is_empty(&self) -> bool { self.clusters.is_empty() }

    pub fn ids(&self) -> impl Iterator<Item = ClusterId> + '_ { (0..self.clusters.len() as u32).map(ClusterId) }

    pub fn iter(&self) -> impl Iterator<Item = (ClusterId, &Cluster)> + '_ { self.ids().zip(self.clusters.iter()) }

    /// Tag name to member clusters.
    pub fn tag_groups(&self) -> &KnownGroups { &self.tags }

    /// Stable name for a cluster set: `all-clusters` for the full index, otherwise the preset cover.
    pub fn group<I: IntoIterator<Item = ClusterId>>(&self, ids: I) -> String {
        let set: BTreeSet<ClusterId> = ids.into_iter().collect();
        if set.len() > 1 && set.len() == self.len() && set.iter().all(|id| self.get(*id).is_some()) {
            return ALL_CLUSTERS.to_string();
        }
        name_for(self, set, &self.tags)
    }
}

#[derive(Debug, Clone)]
struct Glob {
    raw: String,
    matcher: GlobMatcher,
}

impl Glob {
    fn new(raw: &str) -> crate::Result<Self> {
        let glob = GlobBuilder::new(raw)
            .literal_separator(true)
            .build()
            .map_err(|source| Error::InvalidPattern { pattern: raw.to_string(), source })?;
        Ok(Self { raw: raw.to_string(), matcher: glob.compile_matcher() })
    }

    fn is_match(&self, name: &str) -> bool { self.matcher.is_match(name) }
}

/// Shell-style name patterns; a leading `-` turns a pattern into an exclusion. Empty patterns match everything.
#[derive(Debug, Clone, Default)]
pub struct Patterns {
    include: Vec<Glob>,
    exclude: Vec<Glob>,
}

impl Patterns {
    pub fn parse<I, S>(items: I) -> crate::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = Self::default();
        for item in items {
            let item = item.as_ref().trim();
            match item.strip_prefix('-') {
                Some(rest) => out.exclude.push(Glob::new(rest)?),
                None => out.include.push(Glob::new(item)?),
            }
        }
        Ok(out)
    }

    pub fn is_empty(&self) -> bool { self.include.is_empty() && self.exclude.is_empty() }

    pub fn matches(&self, name: &str) -> bool {
        (self.include.is_empty() || self.include.iter().any(|g| g.is_match(name)))
            && !self.exclude.iter().any(|g| g.is_match(name))
    }

    /// Like [`Patterns::matches`] for an object known under several names: some name must be included and none
    /// excluded.
    pub fn matches_any(&self, names: &[&str]) -> bool {
        (self.include.is_empty() || names.iter().any(|n| self.include.iter().any(|g| g.is_match(n))))
            && !names.iter().any(|n| self.exclude.iter().any(|g| g.is_match(n)))
    }

    pub fn has_includes(&self) -> bool { !self.include.is_empty() }

    /// Append exclusions.
    pub fn exclude<I, S>(&mut self, items: I) -> crate::Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for item in items {
            self.exclude.push(Glob::new(item.as_ref().trim())?);
        }
        Ok(())
    }

    /// Matching names, in input order.
    pub fn select<'a, I: IntoIterator<Item = &'a str>>(&self, names: I) -> Vec<&'a str> {
        names.into_iter().filter(|n| self.matches(n)).collect()
    }

    fn raw(&self) -> Vec<String> {
        self.include.iter().map(|g| g.raw.clone()).chain(self.exclude.iter().map(|g| format!("-{}", g.raw))).collect()
    }
}

impl Serialize for Patterns {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> { self.raw().serialize(serializer) }
}

impl<'de> Deserialize<'de> for Patterns {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
        }
        let items = match Raw::deserialize(deserializer)? {
            Raw::One(s) => s.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect(),
            Raw::Many(v) => v,
        };
        Patterns::parse(items).map_err(serde::de::Error::custom)
    }
}

/// Tags applied to every cluster whose name matches `names`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupSelector {
    #[serde(default)]
    pub names: Patterns,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Tag groups restricted to the given clusters; used by tests and the CLI listing.
pub fn groups_of(index: &ClusterIndex, ids: &BTreeSet<ClusterId>) -> BTreeMap<String, BTreeSet<ClusterId>> {
    index
        .tag_groups()
        .iter()
        .filter(|(_, members)| !members.is_disjoint(ids))
        .map(|(tag, members)| (tag.clone(), members.intersection(ids).copied().collect()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> ClusterIndex {
        let mut idx = ClusterIndex::new();
        idx.add(Cluster::new("c1").with_tags(["a", "b", "c"]));
        idx.add(Cluster::new("c2").with_tags(["a"]));
        idx.add(Cluster::new("c3").with_tags(["b"]));
        idx.add(Cluster::new("c4").with_tags(["c"]));
        idx.add(Cluster::new("c5"));
        idx
    }

    fn ids(idx: &ClusterIndex, names: &[&str]) -> Vec<ClusterId> { names.iter().map(|n| idx.id(n).unwrap()).collect() }

    #[test]
    fn add_is_idempotent_by_name() {
        let mut idx = ClusterIndex::new();
        let a = idx.add(Cluster::new("a").with_tags(["x"]));
        let b = idx.add(Cluster::new("b"));
        let again = idx.add(Cluster::new("a").with_tags(["y"]));
        assert_eq!(a, again);
        assert_eq!(b, ClusterId(1));
        assert_eq!(idx.len(), 2);
        assert_eq!(idx.get(a).unwrap().tags.iter().cloned().collect::<Vec<_>>(), vec!["x", "y"]);
        assert_eq!(idx.tag_groups()["y"].iter().copied().collect::<Vec<_>>(), vec![a]);
    }

    #[test]
    fn group_names() {
        let idx = index();
        let cases: &[(&[&str], &str)] = &[
            (&["c1", "c2", "c3", "c4", "c5"], ALL_CLUSTERS),
            (&["c1", "c2", "c3", "c4"], "a_c3_c4"),
            (&["c1", "c2", "c4"], "a_c4"),
            (&["c1", "c2"], "a"),
            (&["c1", "c4"], "c"),
            (&["c2", "c3", "c4", "c5"], "c2_c3_c4_c5"),
            (&["c1", "c5"], "c1_c5"),
            (&["c3"], "c3"),
        ];
        for (names, want) in cases {
            assert_eq!(idx.group(ids(&idx, names)), *want, "{names:?}");
        }
    }

    #[test]
    fn group_is_order_invariant() {
        let idx = index();
        let fwd = idx.group(ids(&idx, &["c1", "c2", "c4"]));
        let rev = idx.group(ids(&idx, &["c4", "c2", "c1"]));
        assert_eq!(fwd, rev);
    }

    #[test]
    fn unknown_cluster() {
        assert!(matches!(index().id("nope"), Err(Error::UnknownCluster(_))));
    }

    #[test]
    fn patterns_include_exclude() {
        let p = Patterns::parse(["prod-*", "-prod-b"]).unwrap();
        assert_eq!(p.select(["prod-a", "prod-b", "dev-a", "prod-c"]), vec!["prod-a", "prod-c"]);
        assert!(Patterns::default().matches("anything"));
        let only_exclude = Patterns::parse(["-dev-?"]).unwrap();
        assert!(only_exclude.matches("prod"));
        assert!(!only_exclude.matches("dev-a"));
        let class = Patterns::parse(["c[12]", "d[!x]"]).unwrap();
        assert!(class.matches("c1") && class.matches("dy") && !class.matches("c3") && !class.matches("dx"));
    }

    #[test]
    fn patterns_keep_separators_literal() {
        let p = Patterns::parse(["arn:aws:eks:*:cluster/*"]).unwrap();
        assert!(p.matches("arn:aws:eks:eu-west-1:cluster/prod"));
        assert!(!p.matches("arn:aws:eks:eu-west-1:cluster/prod/extra"));
        assert!(!Patterns::parse(["*"]).unwrap().matches("team/prod"));
        assert!(matches!(Patterns::parse(["c[1"]), Err(Error::InvalidPattern { .. })));
    }

    #[test]
    fn patterns_over_several_names() {
        let mut p = Patterns::parse(["*"]).unwrap();
        p.exclude(["replicasets.apps"]).unwrap();
        assert!(p.matches_any(&["apps/v1/Deployment", "Deployment", "deployments.apps"]));
        assert!(!p.matches_any(&["apps/v1/ReplicaSet", "ReplicaSet", "replicasets.apps"]));
        assert!(p.has_includes() && !Patterns::default().has_includes());
    }

    #[test]
    fn patterns_from_yaml() {
        let one: Patterns = serde_yaml::from_str("'a*, -ab'").unwrap();
        assert!(one.matches("ac") && !one.matches("ab"));
        let many: Patterns = serde_yaml::from_str("[x, y]").unwrap();
        assert!(many.matches("y") && !many.matches("z"));
    }

    #[test]
    fn build_applies_selectors() {
        let selectors: Vec<GroupSelector> = serde_yaml::from_str(
            "- names: [prod-*]\n  tags: [prod]\n- names: ['*-a']\n  tags: [zone-a]\n",
        )
        .unwrap();
        let idx = ClusterIndex::build(["prod-b", "dev-a", "prod-a"], &selectors);
        assert_eq!(idx.name(ClusterId(0)), Some("dev-a"));
        let prod_a = idx.get(idx.id("prod-a").unwrap()).unwrap();
        assert_eq!(prod_a.tags.iter().cloned().collect::<Vec<_>>(), vec!["prod", "zone-a"]);
        let scoped = groups_of(&idx, &[idx.id("dev-a").unwrap()].into_iter().collect());
        assert_eq!(scoped.keys().cloned().collect::<Vec<_>>(), vec!["zone-a"]);
    }
}
