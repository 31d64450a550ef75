use kfold_core::{Node, NodeKind, Scalar, ScalarTag};

const HEADER: &str = "{{- include \"merge_presets\" . -}}\n";

/// Chart template tree: a document whose nodes may be replaced by value references or guarded by presence flags.
#[derive(Debug, Clone, PartialEq)]
pub enum Template {
    Scalar(Scalar),
    Mapping(Vec<(String, Template)>),
    Sequence(Vec<Template>),
    /// Value looked up in `.Values.global` under `name`.
    Variable { name: String, kind: NodeKind },
    /// `body` is rendered only when `.Values.global` holds `flag`.
    Conditional { flag: String, body: Box<Template> },
}

impl From<&Node> for Template {
    fn from(node: &Node) -> Self {
        match node {
            Node::Scalar(s) => Template::Scalar(s.clone()),
            Node::Mapping(m) => Template::Mapping(m.iter().map(|(k, v)| (k.clone(), Template::from(v))).collect()),
            Node::Sequence(items) => Template::Sequence(items.iter().map(Template::from).collect()),
        }
    }
}

impl Template {
    /// Variables referenced anywhere in the tree, in document order.
    pub fn variables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect(&mut out, false);
        out
    }

    /// Presence flags guarding nodes, in document order.
    pub fn flags(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect(&mut out, true);
        out
    }

    fn collect<'t>(&'t self, out: &mut Vec<&'t str>, flags: bool) {
        match self {
            Template::Scalar(_) => {}
            Template::Mapping(entries) => entries.iter().for_each(|(_, v)| v.collect(out, flags)),
            Template::Sequence(items) => items.iter().for_each(|v| v.collect(out, flags)),
            Template::Variable { name, .. } => {
                if !flags {
                    out.push(name)
                }
            }
            Template::Conditional { flag, body } => {
                if flags {
                    out.push(flag);
                }
                body.collect(out, flags);
            }
        }
    }

    /// Helm template text for one resource file.
    pub fn render(&self) -> String {
        let mut out = String::from(HEADER);
        block(self, 0, &mut out);
        out
    }
}

fn pad(indent: usize) -> String { " ".repeat(indent) }

fn quoted(name: &str) -> String { serde_json::Value::String(name.to_string()).to_string() }

fn open_if(flag: &str, indent: usize, out: &mut String) {
    out.push_str(&format!("{}{{{{- if hasKey .Values.global {} }}}}\n", pad(indent), quoted(flag)));
}

fn close_if(indent: usize, out: &mut String) { out.push_str(&format!("{}{{{{- end }}}}\n", pad(indent))); }

fn scalar_var(name: &str) -> String { format!("{{{{ index .Values.global {} | toJson }}}}", quoted(name)) }

fn container_var(name: &str, indent: usize) -> String {
    format!("{{{{- index .Values.global {} | toYaml | nindent {indent} }}}}", quoted(name))
}

/// Plain YAML token, or a template action printing the JSON literal when the text would be read as template syntax.
fn token(s: &Scalar) -> String {
    if s.tag == ScalarTag::Str && (s.value.contains("{{") || s.value.contains("}}")) {
        return format!("{{{{ {} | toJson }}}}", quoted(&s.value));
    }
    s.token()
}

fn key_token(k: &str) -> String { token(&Scalar::str(k)) }

fn block(t: &Template, indent: usize, out: &mut String) {
    let p = pad(indent);
    match t {
        Template::Conditional { flag, body } => {
            open_if(flag, indent, out);
            block(body, indent, out);
            close_if(indent, out);
        }
        Template::Mapping(entries) if !entries.is_empty() => entries.iter().for_each(|(k, v)| entry(k, v, indent, out)),
        Template::Sequence(items) if !items.is_empty() => items.iter().for_each(|v| item(v, indent, out)),
        Template::Mapping(_) => out.push_str(&format!("{p}{{}}\n")),
        Template::Sequence(_) => out.push_str(&format!("{p}[]\n")),
        Template::Scalar(s) => out.push_str(&format!("{p}{}\n", token(s))),
        Template::Variable { name, kind: NodeKind::Scalar } => out.push_str(&format!("{p}{}\n", scalar_var(name))),
        Template::Variable { name, .. } => out.push_str(&format!("{p}{}\n", container_var(name, indent))),
    }
}

fn entry(k: &str, v: &Template, indent: usize, out: &mut String) {
    let p = pad(indent);
    let key = key_token(k);
    match v {
        Template::Conditional { flag, body } => {
            open_if(flag, indent, out);
            entry(k, body, indent, out);
            close_if(indent, out);
        }
        Template::Mapping(entries) if !entries.is_empty() => {
            out.push_str(&format!("{p}{key}:\n"));
            entries.iter().for_each(|(k, v)| entry(k, v, indent + 2, out));
        }
        Template::Sequence(items) if !items.is_empty() => {
            out.push_str(&format!("{p}{key}:\n"));
            items.iter().for_each(|v| item(v, indent, out));
        }
        Template::Mapping(_) => out.push_str(&format!("{p}{key}: {{}}\n")),
        Template::Sequence(_) => out.push_str(&format!("{p}{key}: []\n")),
        Template::Scalar(s) => out.push_str(&format!("{p}{key}: {}\n", token(s))),
        Template::Variable { name, kind: NodeKind::Scalar } => out.push_str(&format!("{p}{key}: {}\n", scalar_var(name))),
        Template::Variable { name, .. } => out.push_str(&format!("{p}{key}: {}\n", container_var(name, indent + 2))),
    }
}

fn item(v: &Template, indent: usize, out: &mut String) {
    let p = pad(indent);
    match v {
        Template::Conditional { flag, body } => {
            open_if(flag, indent, out);
            item(body, indent, out);
            close_if(indent, out);
        }
        Template::Mapping(entries) if !entries.is_empty() => {
            let mut body = String::new();
            entries.iter().for_each(|(k, v)| entry(k, v, indent + 2, &mut body));
            let inner = pad(indent + 2);
            match body.strip_prefix(&inner) {
                // the first key shares the dash line unless the body opens with a template action
                Some(rest) if !rest.starts_with("{{") => out.push_str(&format!("{p}- {rest}")),
                _ => out.push_str(&format!("{p}-\n{body}")),
            }
        }
        Template::Sequence(items) if !items.is_empty() => {
            out.push_str(&format!("{p}-\n"));
            items.iter().for_each(|v| item(v, indent + 2, out));
        }
        Template::Mapping(_) => out.push_str(&format!("{p}- {{}}\n")),
        Template::Sequence(_) => out.push_str(&format!("{p}- []\n")),
        Template::Scalar(s) => out.push_str(&format!("{p}- {}\n", token(s))),
        Template::Variable { name, kind: NodeKind::Scalar } => out.push_str(&format!("{p}- {}\n", scalar_var(name))),
        Template::Variable { name, .. } => out.push_str(&format!("{p}- {}\n", container_var(name, indent + 2))),
    }
}
