use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use smallvec::SmallVec;

use crate::node::{Node, Scalar};
use crate::Error;

/// Key fields identifying one element of an associative list, e.g. `[name=app]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Selector(SmallVec<[(String, Scalar); 1]>);

impl Selector {
    pub fn new(pairs: impl IntoIterator<Item = (String, Scalar)>) -> Self { Self(pairs.into_iter().collect()) }

    pub fn pairs(&self) -> &[(String, Scalar)] { &self.0 }

    /// True when `node` is a mapping whose key fields carry the selector's values.
    pub fn matches(&self, node: &Node) -> bool {
        !self.0.is_empty()
            && self.0.iter().all(|(k, v)| node.get(k).and_then(Node::as_scalar).is_some_and(|s| s.value == v.value))
    }

    /// Same key fields with the same values; scalar tags are not compared.
    pub fn same_as(&self, other: &Selector) -> bool {
        self.0.len() == other.0.len() && self.0.iter().zip(&other.0).all(|((ak, av), (bk, bv))| ak == bk && av.value == bv.value)
    }

    /// Mapping holding just the key fields, with their original tags.
    pub fn to_node(&self) -> Node { Node::Mapping(self.0.iter().map(|(k, v)| (k.clone(), Node::Scalar(v.clone()))).collect()) }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", k, quoted(&v.value))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Field(String),
    Wildcard,
    Select(Selector),
}

impl Segment {
    pub fn field(name: impl Into<String>) -> Self { Segment::Field(name.into()) }
}

fn needs_brackets(name: &str) -> bool {
    name.is_empty() || name == "*" || name.contains(['.', '[', ']'])
}

/// `text`, JSON-quoted when it would not read back verbatim inside brackets.
fn quoted(text: &str) -> Cow<'_, str> {
    if text.trim() != text || text.starts_with('"') || text.contains([',', '=', ']']) {
        Cow::Owned(serde_json::Value::from(text).to_string())
    } else {
        Cow::Borrowed(text)
    }
}

fn unquote(text: &str) -> Option<String> { serde_json::from_str(text).ok() }

/// Byte offsets of `sep` outside double-quoted runs.
fn unquoted(text: &str, sep: char) -> impl Iterator<Item = usize> + '_ {
    let mut in_quotes = false;
    let mut escaped = false;
    text.char_indices().filter_map(move |(i, c)| {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == sep && !in_quotes => return Some(i),
            _ => {}
        }
        None
    })
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Field(name) if needs_brackets(name) => write!(f, "[{}]", quoted(name)),
            Segment::Field(name) => f.write_str(name),
            Segment::Wildcard => f.write_str("*"),
            Segment::Select(sel) => write!(f, "[{sel}]"),
        }
    }
}

/// Location inside a document: `spec.template.spec.containers.[name=app].image`.
///
/// Fields containing dots are bracketed (`metadata.annotations.[example.com/x]`). Parsing also accepts
/// JSON pointers (`/spec/replicas`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NodePath(SmallVec<[Segment; 8]>);

impl NodePath {
    pub fn root() -> Self { Self::default() }

    pub fn from_segments(segs: impl IntoIterator<Item = Segment>) -> Self { Self(segs.into_iter().collect()) }

    pub fn segments(&self) -> &[Segment] { &self.0 }
    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn last(&self) -> Option<&Segment> { self.0.last() }

    pub fn push(&mut self, seg: Segment) { self.0.push(seg); }

    pub fn child(&self, seg: Segment) -> Self {
        let mut out = self.clone();
        out.0.push(seg);
        out
    }

    pub fn parent(&self) -> Option<Self> {
        let (_, head) = self.0.split_last()?;
        Some(Self(head.iter().cloned().collect()))
    }

    pub fn common_prefix_len(&self, other: &NodePath) -> usize {
        self.0.iter().zip(other.0.iter()).take_while(|(a, b)| a == b).count()
    }

    pub fn has_wildcard(&self) -> bool { self.0.iter().any(|s| matches!(s, Segment::Wildcard)) }

    /// RFC 6901 rendering.
    pub fn to_pointer(&self) -> String {
        let mut out = String::new();
        for seg in &self.0 {
            out.push('/');
            let raw = match seg {
                Segment::Field(name) => name.clone(),
                other => other.to_string(),
            };
            out.push_str(&raw.replace('~', "~0").replace('/', "~1"));
        }
        out
    }

    fn parse_pointer(s: &str) -> Result<Self, Error> {
        let mut out = NodePath::root();
        for raw in s[1..].split('/') {
            let raw = raw.replace("~1", "/").replace("~0", "~");
            let seg = match raw.as_str() {
                "*" => Segment::Wildcard,
                r if r.starts_with('[') && r.ends_with(']') && r.contains('=') => bracketed(s, &r[1..r.len() - 1])?,
                _ => Segment::Field(raw),
            };
            out.push(seg);
        }
        Ok(out)
    }

    fn parse_dotted(s: &str) -> Result<Self, Error> {
        let invalid = |reason: &str| Error::InvalidPath { path: s.to_string(), reason: reason.to_string() };
        let bytes = s.as_bytes();
        let mut out = NodePath::root();
        let mut i = 0;
        while i < s.len() {
            if bytes[i] == b'[' {
                let rest = &s[i + 1..];
                let close = unquoted(rest, ']').next().ok_or_else(|| invalid("unclosed '['"))?;
                out.push(bracketed(s, &rest[..close])?);
                i += close + 2;
            } else {
                let end = s[i..].find(['.', '[']).map_or(s.len(), |n| i + n);
                let token = &s[i..end];
                if token.is_empty() {
                    return Err(invalid("empty segment"));
                }
                out.push(if token == "*" { Segment::Wildcard } else { Segment::field(token) });
                i = end;
            }
            match bytes.get(i) {
                None | Some(b'[') => {}
                Some(b'.') if i + 1 < s.len() => i += 1,
                Some(b'.') => return Err(invalid("trailing '.'")),
                Some(_) => return Err(invalid(&format!("unexpected {:?}", s[i..].chars().next().unwrap_or_default()))),
            }
        }
        Ok(out)
    }
}

/// Contents of `[...]`: a selector when some unquoted `=` is present, otherwise a field name.
fn bracketed(path: &str, inner: &str) -> Result<Segment, Error> {
    let invalid = |reason: String| Error::InvalidPath { path: path.to_string(), reason };
    let unquote_or = |text: &str| unquote(text).ok_or_else(|| invalid(format!("bad quoting in {text:?}")));
    if unquoted(inner, '=').next().is_none() {
        let name = if inner.starts_with('"') { unquote_or(inner)? } else { inner.to_string() };
        return Ok(Segment::Field(name));
    }
    let mut pairs = SmallVec::new();
    let mut start = 0;
    for end in unquoted(inner, ',').chain([inner.len()]) {
        let part = &inner[start..end];
        start = end + 1;
        let eq = unquoted(part, '=').next().ok_or_else(|| invalid(format!("selector part {part:?} is not key=value")))?;
        let (k, v) = (part[..eq].trim(), part[eq + 1..].trim());
        if k.is_empty() {
            return Err(invalid("empty selector key".into()));
        }
        let value = if v.starts_with('"') { Scalar::str(unquote_or(v)?) } else { Scalar::infer(v) };
        pairs.push((k.to_string(), value));
    }
    Ok(Segment::Select(Selector(pairs)))
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{seg}")?;
        }
        Ok(())
    }
}

impl FromStr for NodePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Ok(NodePath::root())
        } else if s.starts_with('/') {
            Self::parse_pointer(s)
        } else {
            Self::parse_dotted(s)
        }
    }
}

impl Serialize for NodePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> { serializer.collect_str(self) }
}

impl<'de> Deserialize<'de> for NodePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
