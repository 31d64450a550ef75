use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_yaml::Value;

use crate::path::{NodePath, Segment};

/// Shape of a document node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Scalar,
    Mapping,
    Sequence,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeKind::Scalar => "scalar",
            NodeKind::Mapping => "mapping",
            NodeKind::Sequence => "sequence",
        })
    }
}

/// Resolved YAML type of a scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarTag {
    Null,
    Bool,
    Int,
    Float,
    Str,
}

/// Scalar text plus its resolved tag. Non-string scalars keep their canonical text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scalar {
    pub value: String,
    pub tag: ScalarTag,
}

impl Scalar {
    pub fn str(value: impl Into<String>) -> Self { Self { value: value.into(), tag: ScalarTag::Str } }
    pub fn null() -> Self { Self { value: "null".into(), tag: ScalarTag::Null } }
    pub fn bool(b: bool) -> Self { Self { value: b.to_string(), tag: ScalarTag::Bool } }
    pub fn int(i: i64) -> Self { Self { value: i.to_string(), tag: ScalarTag::Int } }

    /// Resolve plain (unquoted) text the way a YAML loader would.
    pub fn infer(text: &str) -> Self {
        if text.is_empty() {
            return Self::str(text);
        }
        match serde_yaml::from_str::<Value>(text) {
            Ok(v @ (Value::Null | Value::Bool(_) | Value::Number(_))) => Self::from_value(&v).unwrap_or_else(|| Self::str(text)),
            _ => Self::str(text),
        }
    }

    pub fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::Null => Some(Self::null()),
            Value::Bool(b) => Some(Self::bool(*b)),
            Value::Number(n) if n.is_f64() => Some(Self { value: n.to_string(), tag: ScalarTag::Float }),
            Value::Number(n) => Some(Self { value: n.to_string(), tag: ScalarTag::Int }),
            Value::String(s) => Some(Self::str(s.clone())),
            Value::Tagged(t) => Self::from_value(&t.value),
            Value::Sequence(_) | Value::Mapping(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self.tag {
            ScalarTag::Str => Value::String(self.value.clone()),
            _ => serde_yaml::from_str(&self.value).unwrap_or_else(|_| Value::String(self.value.clone())),
        }
    }

    /// Single-line YAML token for this scalar; strings are quoted only when plain text would not round-trip.
    pub fn token(&self) -> String {
        match self.tag {
            ScalarTag::Str => quote(&self.value),
            _ => self.value.clone(),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.value) }
}

const AMBIGUOUS_WORDS: &[&str] = &["true", "false", "null", "yes", "no", "on", "off", "y", "n", "inf", "infinity", "nan"];

fn is_plain_safe(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else { return false };
    first.is_ascii_alphabetic()
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/' | '.'))
        && !AMBIGUOUS_WORDS.contains(&s.to_ascii_lowercase().as_str())
}

/// Render `s` as a single-line YAML string token.
pub(crate) fn quote(s: &str) -> String {
    if is_plain_safe(s) {
        return s.to_owned();
    }
    match serde_yaml::to_string(&Value::String(s.to_owned())) {
        Ok(out) => {
            let out = out.trim_end_matches('\n');
            if out.contains('\n') { json_quote(s) } else { out.to_owned() }
        }
        Err(_) => json_quote(s),
    }
}

fn json_quote(s: &str) -> String { serde_json::to_string(s).unwrap_or_else(|_| format!("{s:?}")) }

/// Insertion-ordered mapping. Equality is order-insensitive; use [`Node::to_flow`] for ordered comparison.
pub type Mapping = IndexMap<String, Node>;

/// A YAML document tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Scalar(Scalar),
    Mapping(Mapping),
    Sequence(Vec<Node>),
}

impl Default for Node {
    fn default() -> Self { Node::Mapping(Mapping::new()) }
}

impl From<Scalar> for Node {
    fn from(s: Scalar) -> Self { Node::Scalar(s) }
}

impl Node {
    pub fn str(value: impl Into<String>) -> Self { Node::Scalar(Scalar::str(value)) }

    /// Empty container (or null scalar) of `kind`; used as a container placeholder.
    pub fn empty(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Scalar => Node::Scalar(Scalar::null()),
            NodeKind::Mapping => Node::Mapping(Mapping::new()),
            NodeKind::Sequence => Node::Sequence(Vec::new()),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Scalar(_) => NodeKind::Scalar,
            Node::Mapping(_) => NodeKind::Mapping,
            Node::Sequence(_) => NodeKind::Sequence,
        }
    }

    pub fn is_empty_container(&self) -> bool {
        match self {
            Node::Mapping(m) => m.is_empty(),
            Node::Sequence(s) => s.is_empty(),
            Node::Scalar(_) => false,
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> { if let Node::Scalar(s) = self { Some(s) } else { None } }
    pub fn as_mapping(&self) -> Option<&Mapping> { if let Node::Mapping(m) = self { Some(m) } else { None } }
    pub fn as_mapping_mut(&mut self) -> Option<&mut Mapping> { if let Node::Mapping(m) = self { Some(m) } else { None } }
    pub fn as_sequence(&self) -> Option<&[Node]> { if let Node::Sequence(s) = self { Some(s) } else { None } }

    /// Field of a mapping node.
    pub fn get(&self, key: &str) -> Option<&Node> { self.as_mapping().and_then(|m| m.get(key)) }

    /// String value of a scalar field of a mapping node.
    pub fn get_str(&self, key: &str) -> Option<&str> { self.get(key).and_then(Node::as_scalar).map(|s| s.value.as_str()) }

    /// Follow `path` (fields and selectors only).
    pub fn lookup(&self, path: &NodePath) -> Option<&Node> {
        let mut cur = self;
        for seg in path.segments() {
            cur = match (cur, seg) {
                (Node::Mapping(m), Segment::Field(k)) => m.get(k)?,
                (Node::Sequence(items), Segment::Select(sel)) => items.iter().find(|i| sel.matches(i))?,
                _ => return None,
            };
        }
        Some(cur)
    }

    /// Delete every node matching `path`; wildcard and selector segments fan out. Returns the number removed.
    pub fn remove_path(&mut self, path: &NodePath) -> usize { remove_at(self, path.segments()) }

    pub fn from_value(v: &Value) -> Node {
        match v {
            Value::Mapping(m) => Node::Mapping(m.iter().map(|(k, v)| (key_text(k), Node::from_value(v))).collect()),
            Value::Sequence(items) => Node::Sequence(items.iter().map(Node::from_value).collect()),
            Value::Tagged(t) => Node::from_value(&t.value),
            other => Node::Scalar(Scalar::from_value(other).unwrap_or_else(Scalar::null)),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Node::Scalar(s) => s.to_value(),
            Node::Mapping(m) => Value::Mapping(m.iter().map(|(k, v)| (Value::String(k.clone()), v.to_value())).collect()),
            Node::Sequence(items) => Value::Sequence(items.iter().map(Node::to_value).collect()),
        }
    }

    pub fn parse(text: &str) -> crate::Result<Node> {
        let v: Value = serde_yaml::from_str(text)?;
        Ok(Node::from_value(&v))
    }

    /// Parse a multi-document stream, skipping empty documents.
    pub fn parse_all(text: &str) -> crate::Result<Vec<Node>> {
        let mut out = Vec::new();
        for doc in serde_yaml::Deserializer::from_str(text) {
            let v = Value::deserialize(doc)?;
            if !v.is_null() {
                out.push(Node::from_value(&v));
            }
        }
        Ok(out)
    }

    /// Block-style YAML document text.
    pub fn to_yaml_string(&self) -> crate::Result<String> { Ok(serde_yaml::to_string(&self.to_value())?) }

    /// Canonical single-line flow serialization; two nodes are structurally equal iff these match.
    pub fn to_flow(&self) -> String {
        let mut out = String::new();
        self.write_flow(&mut out);
        out
    }

    pub fn write_flow(&self, out: &mut String) {
        match self {
            Node::Scalar(s) => out.push_str(&s.token()),
            Node::Mapping(m) => {
                out.push('{');
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&quote(k));
                    out.push_str(": ");
                    v.write_flow(out);
                }
                out.push('}');
            }
            Node::Sequence(items) => {
                out.push('[');
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    v.write_flow(out);
                }
                out.push(']');
            }
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.to_flow()) }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> { self.to_value().serialize(serializer) }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(|v| Node::from_value(&v))
    }
}

fn key_text(k: &Value) -> String {
    match k {
        Value::String(s) => s.clone(),
        other => match Scalar::from_value(other) {
            Some(s) => s.value,
            None => Node::from_value(other).to_flow(),
        },
    }
}

fn remove_at(node: &mut Node, segs: &[Segment]) -> usize {
    let Some((head, rest)) = segs.split_first() else { return 0 };
    if rest.is_empty() {
        return match (node, head) {
            (Node::Mapping(m), Segment::Field(k)) => usize::from(m.shift_remove(k).is_some()),
            (Node::Mapping(m), Segment::Wildcard) => std::mem::take(m).len(),
            (Node::Sequence(items), Segment::Wildcard) => std::mem::take(items).len(),
            (Node::Sequence(items), Segment::Select(sel)) => {
                let before = items.len();
                items.retain(|i| !sel.matches(i));
                before - items.len()
            }
            _ => 0,
        };
    }
    match (node, head) {
        (Node::Mapping(m), Segment::Field(k)) => m.get_mut(k).map_or(0, |c| remove_at(c, rest)),
        (Node::Mapping(m), Segment::Wildcard) => m.values_mut().map(|c| remove_at(c, rest)).sum(),
        (Node::Sequence(items), Segment::Wildcard) => items.iter_mut().map(|c| remove_at(c, rest)).sum(),
        (Node::Sequence(items), Segment::Select(sel)) => {
            items.iter_mut().filter(|i| sel.matches(i)).map(|c| remove_at(c, rest)).sum()
        }
        _ => 0,
    }
}
