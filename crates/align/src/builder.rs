use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use kfold_core::{Node, NodeKind, NodePath, ResourceId, Scalar, Segment, Selector};

/// Handle of a node inside a [`Builder`]. Stable for the builder's lifetime, including across value replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("wildcard in path '{0}'")]
    Wildcard(NodePath),
    #[error("cannot descend into {found} with '{segment}' at '{path}'")]
    Mismatch { path: NodePath, segment: String, found: &'static str },
}

#[derive(Debug, Clone)]
enum Slot {
    Mapping(IndexMap<String, NodeId>),
    Sequence(Vec<NodeId>),
    Leaf(Node),
}

impl Slot {
    fn describe(&self) -> &'static str {
        match self {
            Slot::Mapping(_) => "a mapping",
            Slot::Sequence(_) => "a sequence",
            Slot::Leaf(_) => "a leaf value",
        }
    }
}

/// One level of a tree handed to [`Builder::fold`], children already folded.
pub enum Shape<'b, T> {
    Leaf(&'b Node),
    Mapping(Vec<(&'b str, T)>),
    Sequence(Vec<T>),
}

/// Incremental tree construction from `(path, value)` pairs arriving in pre-order.
///
/// The builder remembers the node chain of the previous path, so consecutive paths sharing a prefix do not
/// walk from the root again. Paths fed out of pre-order still produce a correct tree but lose that reuse.
#[derive(Debug, Clone)]
pub struct Builder {
    arena: Vec<Slot>,
    /// Selector each list element was created for.
    elements: FxHashMap<NodeId, Selector>,
    path: NodePath,
    stack: Vec<NodeId>,
    hits: usize,
    misses: usize,
}

impl Builder {
    pub fn new(root: Node) -> Self {
        let mut b = Self {
            arena: Vec::new(),
            elements: FxHashMap::default(),
            path: NodePath::root(),
            stack: Vec::new(),
            hits: 0,
            misses: 0,
        };
        let id = b.insert(root);
        b.stack.push(id);
        b
    }

    /// Builder seeded with the identity fields of `id`.
    pub fn for_resource(id: &ResourceId) -> Self { Self::new(id.seed()) }

    /// Calls that reused a previously materialized non-root ancestor.
    pub fn hits(&self) -> usize { self.hits }
    /// Calls that had to descend from the root.
    pub fn misses(&self) -> usize { self.misses }

    fn alloc(&mut self, slot: Slot) -> NodeId {
        self.arena.push(slot);
        NodeId(self.arena.len() - 1)
    }

    fn insert(&mut self, node: Node) -> NodeId {
        match node {
            Node::Mapping(m) => {
                let id = self.alloc(Slot::Mapping(IndexMap::new()));
                let children = m.into_iter().map(|(k, v)| (k, self.insert(v))).collect();
                self.arena[id.0] = Slot::Mapping(children);
                id
            }
            Node::Sequence(items) => {
                let id = self.alloc(Slot::Sequence(Vec::new()));
                let children = items.into_iter().map(|v| self.insert(v)).collect();
                self.arena[id.0] = Slot::Sequence(children);
                id
            }
            leaf => self.alloc(Slot::Leaf(leaf)),
        }
    }

    /// Attach `value` at `path`, creating missing ancestors. An empty container set onto an existing container of
    /// the same kind keeps the existing one; anything else replaces the node.
    pub fn set(&mut self, path: &NodePath, value: Node) -> Result<NodeId, BuildError> {
        if path.has_wildcard() {
            return Err(BuildError::Wildcard(path.clone()));
        }
        let common = self.path.common_prefix_len(path).min(self.stack.len() - 1);
        if common > 0 {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        self.stack.truncate(common + 1);
        self.path = NodePath::from_segments(path.segments()[..common].iter().cloned());

        let segs = path.segments();
        for (i, seg) in segs.iter().enumerate().skip(common) {
            let parent = self.stack[self.stack.len() - 1];
            let child = self.child(parent, seg, segs.get(i + 1), path)?;
            self.stack.push(child);
            self.path.push(seg.clone());
        }
        let target = self.stack[self.stack.len() - 1];
        self.assign(target, value);
        Ok(target)
    }

    fn child(&mut self, parent: NodeId, seg: &Segment, next: Option<&Segment>, path: &NodePath) -> Result<NodeId, BuildError> {
        let existing = match (&self.arena[parent.0], seg) {
            (Slot::Mapping(m), Segment::Field(k)) => m.get(k).copied(),
            (Slot::Sequence(items), Segment::Select(sel)) => items.iter().copied().find(|c| self.element_matches(*c, sel)),
            (slot, seg) => {
                return Err(BuildError::Mismatch { path: path.clone(), segment: seg.to_string(), found: slot.describe() })
            }
        };
        if let Some(c) = existing {
            return Ok(c);
        }
        let fresh = match (seg, next) {
            // elements start out holding their typed key fields
            (Segment::Select(sel), _) => {
                let id = self.insert(sel.to_node());
                self.elements.insert(id, sel.clone());
                id
            }
            (_, Some(Segment::Select(_))) => self.alloc(Slot::Sequence(Vec::new())),
            (_, Some(_)) => self.alloc(Slot::Mapping(IndexMap::new())),
            (_, None) => self.alloc(Slot::Leaf(Node::Scalar(Scalar::null()))),
        };
        match (&mut self.arena[parent.0], seg) {
            (Slot::Mapping(m), Segment::Field(k)) => {
                m.insert(k.clone(), fresh);
            }
            (Slot::Sequence(items), _) => items.push(fresh),
            _ => {}
        }
        Ok(fresh)
    }

    fn element_matches(&self, id: NodeId, sel: &Selector) -> bool {
        if let Some(own) = self.elements.get(&id) {
            return own.same_as(sel);
        }
        match &self.arena[id.0] {
            Slot::Leaf(node) => sel.matches(node),
            Slot::Mapping(m) => sel.pairs().iter().all(|(k, v)| {
                m.get(k).is_some_and(|c| matches!(&self.arena[c.0], Slot::Leaf(Node::Scalar(s)) if s.value == v.value))
            }),
            Slot::Sequence(_) => false,
        }
    }

    fn assign(&mut self, target: NodeId, value: Node) {
        let slot = &mut self.arena[target.0];
        *slot = match (value.is_empty_container(), value.kind(), &*slot) {
            (true, NodeKind::Mapping, Slot::Mapping(_)) | (true, NodeKind::Sequence, Slot::Sequence(_)) => return,
            (true, NodeKind::Mapping, _) => Slot::Mapping(IndexMap::new()),
            (true, NodeKind::Sequence, _) => Slot::Sequence(Vec::new()),
            _ => Slot::Leaf(value),
        };
    }

    /// Post-order reconstruction; `f` receives each node's id with its children already folded.
    pub fn fold<'s, T, F>(&'s self, f: &mut F) -> T
    where
        F: FnMut(NodeId, Shape<'s, T>) -> T,
    {
        self.fold_at(NodeId(0), f)
    }

    fn fold_at<'s, T, F>(&'s self, id: NodeId, f: &mut F) -> T
    where
        F: FnMut(NodeId, Shape<'s, T>) -> T,
    {
        let shape = match &self.arena[id.0] {
            Slot::Leaf(n) => Shape::Leaf(n),
            Slot::Mapping(m) => Shape::Mapping(m.iter().map(|(k, c)| (k.as_str(), self.fold_at(*c, f))).collect()),
            Slot::Sequence(items) => Shape::Sequence(items.iter().map(|c| self.fold_at(*c, f)).collect()),
        };
        f(id, shape)
    }

    pub fn build(&self) -> Node {
        self.fold(&mut |_, shape| match shape {
            Shape::Leaf(n) => n.clone(),
            Shape::Mapping(entries) => Node::Mapping(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()),
            Shape::Sequence(items) => Node::Sequence(items),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> NodePath { s.parse().unwrap() }

    fn y(s: &str) -> Node { Node::parse(s).unwrap() }

    #[test]
    fn prefix_reuse_counts() {
        let mut b = Builder::new(Node::default());
        b.set(&p("a.b"), y("1")).unwrap();
        b.set(&p("a.c"), y("2")).unwrap();
        b.set(&p("x"), y("3")).unwrap();
        assert_eq!((b.hits(), b.misses()), (1, 2));
        assert_eq!(b.build().to_flow(), "{a: {b: 1, c: 2}, x: 3}");
    }

    #[test]
    fn selectors_create_keyed_elements() {
        let mut b = Builder::new(Node::default());
        b.set(&p("a.b"), y("1")).unwrap();
        b.set(&p("x.y.z.[name=u].v"), y("1")).unwrap();
        b.set(&p("x.y.z.[name=w].v"), y("2")).unwrap();
        b.set(&p("x.l"), y("3")).unwrap();
        assert_eq!(b.build().to_flow(), "{a: {b: 1}, x: {y: {z: [{name: u, v: 1}, {name: w, v: 2}]}, l: 3}}");
        assert_eq!((b.hits(), b.misses()), (2, 2));
    }

    #[test]
    fn typed_keys_survive() {
        let mut b = Builder::new(Node::default());
        b.set(&p("ports.[containerPort=80].protocol"), y("TCP")).unwrap();
        assert_eq!(b.build().to_flow(), "{ports: [{containerPort: 80, protocol: TCP}]}");
    }

    #[test]
    fn elements_differing_in_optional_keys_stay_apart() {
        let mut b = Builder::new(Node::default());
        b.set(&p("ports.[port=53,protocol=UDP].name"), y("dns")).unwrap();
        b.set(&p("ports.[port=53].name"), y("dns-tcp")).unwrap();
        b.set(&p("ports.[port=53,protocol=UDP].targetPort"), y("5353")).unwrap();
        assert_eq!(
            b.build().to_flow(),
            "{ports: [{port: 53, protocol: UDP, name: dns, targetPort: 5353}, {port: 53, name: dns-tcp}]}"
        );
    }

    #[test]
    fn placeholders_keep_existing_children() {
        let id = ResourceId::new("apps/v1", "Deployment", Some("prod"), "web");
        let mut b = Builder::for_resource(&id);
        b.set(&NodePath::root(), Node::default()).unwrap();
        b.set(&p("metadata"), Node::default()).unwrap();
        b.set(&p("metadata.labels"), y("{}")).unwrap();
        b.set(&p("metadata.labels.app"), y("web")).unwrap();
        assert_eq!(
            b.build().to_flow(),
            "{apiVersion: apps/v1, kind: Deployment, metadata: {name: web, namespace: prod, labels: {app: web}}}"
        );
    }

    #[test]
    fn leaf_values_replace() {
        let mut b = Builder::new(y("a: {b: 1}"));
        b.set(&p("a"), y("[1, 2]")).unwrap();
        assert_eq!(b.build().to_flow(), "{a: [1, 2]}");
        b.set(&p("a"), y("{}")).unwrap();
        assert_eq!(b.build().to_flow(), "{a: {}}");
    }

    #[test]
    fn existing_elements_are_found() {
        let mut b = Builder::new(y("l:\n- name: a\n  v: 1\n"));
        b.set(&p("l.[name=a].v"), y("2")).unwrap();
        b.set(&p("l.[name=b].v"), y("3")).unwrap();
        assert_eq!(b.build().to_flow(), "{l: [{name: a, v: 2}, {name: b, v: 3}]}");
    }

    #[test]
    fn errors() {
        let mut b = Builder::new(y("a: 1\nl: []\n"));
        assert!(matches!(b.set(&p("x.*"), y("1")), Err(BuildError::Wildcard(_))));
        assert!(matches!(b.set(&p("a.b"), y("1")), Err(BuildError::Mismatch { found: "a leaf value", .. })));
        assert!(matches!(b.set(&p("l.x"), y("1")), Err(BuildError::Mismatch { found: "a sequence", .. })));
        b.set(&p("l.[name=n]"), y("{}")).unwrap();
        assert_eq!(b.build().to_flow(), "{a: 1, l: [{name: n}]}");
    }

    #[test]
    fn fold_sees_node_ids() {
        let mut b = Builder::new(Node::default());
        let marked = b.set(&p("a.b"), y("1")).unwrap();
        let count = b.fold(&mut |id, shape: Shape<'_, usize>| match shape {
            Shape::Leaf(_) => usize::from(id == marked),
            Shape::Mapping(e) => e.into_iter().map(|(_, c)| c).sum(),
            Shape::Sequence(e) => e.into_iter().sum(),
        });
        assert_eq!(count, 1);
    }
}
