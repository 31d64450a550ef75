use std::fmt;
use std::hash::{Hash, Hasher};

use kfold_core::{ClusterId, Node};
use rustc_hash::{FxHashMap, FxHasher};
use smallvec::SmallVec;

/// Clusters sharing one structurally equal value.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueGroup {
    pub value: Node,
    /// Ascending.
    pub clusters: Vec<ClusterId>,
}

impl fmt::Display for ValueGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.clusters.iter().map(|c| c.0.to_string()).collect();
        write!(f, "{}:{{{}}} {}", self.clusters.len(), ids.join(","), self.value)
    }
}

/// Partition per-cluster values into equality groups.
///
/// Values are equal when their canonical flow serializations match. Groups come out largest first, ties broken by
/// their smallest cluster id.
pub fn group_by_value<'n, I>(values: I) -> Vec<ValueGroup>
where
    I: IntoIterator<Item = (ClusterId, &'n Node)>,
{
    let mut buckets: FxHashMap<u64, SmallVec<[usize; 1]>> = FxHashMap::default();
    let mut groups: Vec<(String, ValueGroup)> = Vec::new();
    for (id, node) in values {
        let flow = node.to_flow();
        let mut h = FxHasher::default();
        flow.hash(&mut h);
        let bucket = buckets.entry(h.finish()).or_default();
        match bucket.iter().copied().find(|&i| groups[i].0 == flow) {
            Some(i) => groups[i].1.clusters.push(id),
            None => {
                bucket.push(groups.len());
                groups.push((flow, ValueGroup { value: node.clone(), clusters: vec![id] }));
            }
        }
    }
    let mut out: Vec<ValueGroup> = groups
        .into_iter()
        .map(|(_, mut g)| {
            g.clusters.sort();
            g.clusters.dedup();
            g
        })
        .collect();
    out.sort_by(|a, b| b.clusters.len().cmp(&a.clusters.len()).then_with(|| a.clusters.first().cmp(&b.clusters.first())));
    out
}
