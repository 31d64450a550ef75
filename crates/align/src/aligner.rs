use std::collections::{BTreeMap, HashSet};

use indexmap::IndexMap;
use kfold_core::{ClusterDocs, ClusterId, Node, NodeKind, NodePath, Segment, Selector};
use kfold_schema::FieldSchema;

/// Key fields tried, in order, for associative lists whose schema declares no key.
pub const DEFAULT_KEYS: &[&str] = &["name", "mountPath", "devicePath", "ip", "type", "topologyKey", "containerPort"];

#[derive(Debug, thiserror::Error)]
pub enum AlignError {
    #[error("kind mismatch at '{path}': {expected} in cluster {first}, {found} in cluster {other}")]
    KindMismatch { path: NodePath, expected: NodeKind, found: NodeKind, first: ClusterId, other: ClusterId },
    #[error("malformed list at '{path}': {reason}")]
    MalformedList { path: NodePath, reason: String },
}

/// One path of the aligned documents with every present cluster's node.
///
/// Container frames report an empty node of their kind as each cluster's value; the real sub-documents of
/// containers are covered by the child frames that follow.
#[derive(Debug, Clone)]
pub struct Frame<'a> {
    path: NodePath,
    kind: NodeKind,
    placeholder: Option<Node>,
    entries: Vec<(ClusterId, &'a Node)>,
}

impl<'a> Frame<'a> {
    pub fn path(&self) -> &NodePath { &self.path }
    pub fn kind(&self) -> NodeKind { self.kind }
    pub fn is_leaf(&self) -> bool { self.placeholder.is_none() }
    pub fn cluster_count(&self) -> usize { self.entries.len() }

    /// Present clusters, ascending.
    pub fn clusters(&self) -> impl Iterator<Item = ClusterId> + '_ { self.entries.iter().map(|(id, _)| *id) }

    /// Per-cluster values: real nodes for leaves, the placeholder for containers.
    pub fn values(&self) -> impl Iterator<Item = (ClusterId, &Node)> + '_ {
        self.entries.iter().map(move |(id, n)| (*id, self.placeholder.as_ref().unwrap_or(*n)))
    }

    /// Per-cluster sub-documents, regardless of frame kind.
    pub fn raw(&self) -> impl Iterator<Item = (ClusterId, &'a Node)> + '_ { self.entries.iter().copied() }
}

struct Pending<'a> {
    path: NodePath,
    schema: Option<&'a FieldSchema>,
    entries: Vec<(ClusterId, &'a Node)>,
}

/// Depth-first, pre-order walk over per-cluster documents of one resource.
///
/// Mapping fields are visited in first-seen order (clusters ascending). Associative lists get one child frame
/// per key value, most widespread first. Other lists are opaque leaves. The iterator stops after the first error.
pub struct Aligner<'a> {
    stack: Vec<Pending<'a>>,
    keys: Vec<String>,
    failed: bool,
}

impl<'a> Aligner<'a> {
    pub fn new(docs: &'a ClusterDocs, schema: Option<&'a FieldSchema>) -> Self {
        Self::from_entries(docs.iter().map(|(id, n)| (*id, n)), schema)
    }

    pub fn from_entries<I>(entries: I, schema: Option<&'a FieldSchema>) -> Self
    where
        I: IntoIterator<Item = (ClusterId, &'a Node)>,
    {
        let mut entries: Vec<_> = entries.into_iter().collect();
        entries.sort_by_key(|(id, _)| *id);
        let stack = if entries.is_empty() { Vec::new() } else { vec![Pending { path: NodePath::root(), schema, entries }] };
        Self { stack, keys: DEFAULT_KEYS.iter().map(|k| k.to_string()).collect(), failed: false }
    }

    /// Replace the key fields tried for associative lists without declared keys.
    pub fn with_common_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    fn step(&mut self, p: Pending<'a>) -> Result<Frame<'a>, AlignError> {
        let (first, head) = p.entries[0];
        let kind = head.kind();
        if let Some((other, node)) = p.entries.iter().find(|(_, n)| n.kind() != kind) {
            return Err(AlignError::KindMismatch { path: p.path, expected: kind, found: node.kind(), first, other: *other });
        }
        let container = match kind {
            NodeKind::Scalar => false,
            NodeKind::Mapping => {
                self.push_fields(&p);
                true
            }
            NodeKind::Sequence => match list_keys(p.schema, p.entries.iter().map(|(_, n)| *n), &self.keys) {
                Some(keys) => {
                    self.push_elements(&p, &keys)?;
                    true
                }
                None => false,
            },
        };
        Ok(Frame { path: p.path, kind, placeholder: container.then(|| Node::empty(kind)), entries: p.entries })
    }

    fn push_fields(&mut self, p: &Pending<'a>) {
        let mut fields: IndexMap<&'a str, Vec<(ClusterId, &'a Node)>> = IndexMap::new();
        for &(id, node) in &p.entries {
            if let Node::Mapping(m) = node {
                for (k, v) in m {
                    fields.entry(k.as_str()).or_default().push((id, v));
                }
            }
        }
        let children = fields.into_iter().map(|(k, entries)| Pending {
            path: p.path.child(Segment::field(k)),
            schema: p.schema.and_then(|s| s.field(k)),
            entries,
        });
        self.push_reversed(children.collect());
    }

    fn push_elements(&mut self, p: &Pending<'a>, keys: &[String]) -> Result<(), AlignError> {
        let malformed = |reason: String| AlignError::MalformedList { path: p.path.clone(), reason };
        let mut elements: IndexMap<String, (Selector, Vec<(ClusterId, &'a Node)>)> = IndexMap::new();
        for &(id, node) in &p.entries {
            let mut seen = HashSet::new();
            for item in node.as_sequence().unwrap_or_default() {
                let sel = selector_of(item, keys).map_err(|r| malformed(format!("cluster {id}: {r}")))?;
                let text = sel.to_string();
                if !seen.insert(text.clone()) {
                    return Err(malformed(format!("cluster {id}: duplicate element [{text}]")));
                }
                elements.entry(text).or_insert_with(|| (sel, Vec::new())).1.push((id, item));
            }
        }
        let mut ordered: Vec<_> = elements.into_iter().collect();
        ordered.sort_by(|(a, (_, ae)), (b, (_, be))| be.len().cmp(&ae.len()).then_with(|| a.cmp(b)));
        let element_schema = p.schema.and_then(FieldSchema::elements);
        let children = ordered.into_iter().map(|(_, (sel, entries))| Pending {
            path: p.path.child(Segment::Select(sel)),
            schema: element_schema,
            entries,
        });
        self.push_reversed(children.collect());
        Ok(())
    }

    fn push_reversed(&mut self, children: Vec<Pending<'a>>) { self.stack.extend(children.into_iter().rev()); }
}

impl<'a> Iterator for Aligner<'a> {
    type Item = Result<Frame<'a>, AlignError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let pending = self.stack.pop()?;
        let res = self.step(pending);
        if res.is_err() {
            self.failed = true;
            self.stack.clear();
        }
        Some(res)
    }
}

/// Merge keys for a list: declared by the schema, or the first common key present as a scalar in every element.
pub(crate) fn list_keys<'n, I>(schema: Option<&FieldSchema>, lists: I, common: &[String]) -> Option<Vec<String>>
where
    I: IntoIterator<Item = &'n Node> + Clone,
{
    let keys = schema?.merge_keys()?;
    if !keys.is_empty() {
        return Some(keys.to_vec());
    }
    common
        .iter()
        .find(|k| {
            lists.clone().into_iter().all(|n| {
                n.as_sequence().unwrap_or_default().iter().all(|i| i.get(k).and_then(Node::as_scalar).is_some())
            })
        })
        .map(|k| vec![k.clone()])
}

/// Selector from an element's key fields. The first key is required; later ones are left out when absent, as
/// `protocol` is on ports relying on its default.
pub(crate) fn selector_of(item: &Node, keys: &[String]) -> Result<Selector, String> {
    let m = item.as_mapping().ok_or_else(|| format!("element is a {}, not a mapping", item.kind()))?;
    let mut pairs = Vec::with_capacity(keys.len());
    for (i, k) in keys.iter().enumerate() {
        match m.get(k) {
            Some(Node::Scalar(s)) => pairs.push((k.clone(), s.clone())),
            Some(other) => return Err(format!("key field {k:?} is a {}", other.kind())),
            None if i == 0 => return Err(format!("element lacks key field {k:?}")),
            None => {}
        }
    }
    Ok(Selector::new(pairs))
}

/// Flatten one document into `path -> flow value` for leaves and empty containers.
pub fn leaves(doc: &Node, schema: Option<&FieldSchema>) -> Result<BTreeMap<String, String>, AlignError> {
    let mut out = BTreeMap::new();
    for frame in Aligner::from_entries([(ClusterId(0), doc)], schema) {
        let frame = frame?;
        for (_, node) in frame.raw() {
            if frame.is_leaf() || node.is_empty_container() {
                out.insert(frame.path().to_string(), node.to_flow());
            }
        }
    }
    Ok(out)
}
