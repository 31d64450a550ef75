use std::collections::{BTreeMap, BTreeSet};

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::cluster::{ClusterId, ClusterIndex};

/// Named cluster groups available to [`name_for`], usually the index's tag groups.
pub type KnownGroups = BTreeMap<String, BTreeSet<ClusterId>>;

/// Names longer than this are replaced by their SHA-256 hex digest.
pub const MAX_NAME_LEN: usize = 255;

/// Deterministic name for a cluster set, covering it greedily with the known groups.
///
/// Groups are tried largest first (ties by name); a group is taken only when every member is still uncovered.
/// Uncovered clusters contribute their own names. Parts are sorted and joined by `_`.
pub fn name_for<I>(index: &ClusterIndex, clusters: I, known: &KnownGroups) -> String
where
    I: IntoIterator<Item = ClusterId>,
{
    let requested: BTreeSet<ClusterId> = clusters.into_iter().collect();
    let mut iter = requested.iter();
    match (iter.next(), iter.next()) {
        (None, _) => return String::new(),
        (Some(only), None) => return cluster_name(index, *only),
        _ => {}
    }

    let mut candidates: Vec<(&String, &BTreeSet<ClusterId>)> = known.iter().filter(|(_, m)| !m.is_empty()).collect();
    candidates.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(b.0)));

    let mut remaining = requested;
    let mut parts: Vec<String> = Vec::new();
    for (name, members) in candidates {
        if remaining.is_empty() {
            break;
        }
        if !members.is_subset(&remaining) {
            continue;
        }
        remaining.retain(|id| !members.contains(id));
        parts.push(name.clone());
    }
    parts.extend(remaining.iter().map(|id| cluster_name(index, *id)));
    parts.sort();

    let name = parts.join("_");
    if name.len() > MAX_NAME_LEN {
        let digest = Sha256::digest(name.as_bytes());
        let hashed: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        warn!(len = name.len(), hashed = %hashed, "group name too long; using digest");
        return hashed;
    }
    name
}

fn cluster_name(index: &ClusterIndex, id: ClusterId) -> String {
    index.name(id).map(str::to_string).unwrap_or_else(|| format!("cluster-{}", id.0))
}
