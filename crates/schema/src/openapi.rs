use std::collections::HashMap;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info};

use crate::{FieldSchema, ListType, SchemaError, SchemaSource};

const MAX_DEPTH: usize = 32;

impl FieldSchema {
    /// Convert an OpenAPI v3 schema (as found in a CRD's `openAPIV3Schema`).
    pub fn from_openapi(schema: &Value) -> FieldSchema { convert(schema, None, &mut Vec::new()) }

    /// Convert a swagger definition, resolving `#/definitions/...` references against `definitions`.
    /// Recursive references are cut at the first repetition.
    pub fn from_definitions(definitions: &Value, name: &str) -> Option<FieldSchema> {
        let root = definitions.get(name)?;
        let mut stack = vec![name.to_string()];
        Some(convert(root, Some(definitions), &mut stack))
    }
}

fn ref_name(v: &Value) -> Option<&str> { v.get("$ref").and_then(Value::as_str).and_then(|r| r.strip_prefix("#/definitions/")) }

fn resolve<'a>(schema: &'a Value, defs: Option<&'a Value>) -> Option<(&'a str, &'a Value)> {
    // k8s swagger also wraps references as `allOf: [{$ref}]`
    let name = ref_name(schema)
        .or_else(|| schema.get("allOf").and_then(Value::as_array).and_then(|all| all.iter().find_map(ref_name)))?;
    Some((name, defs?.get(name)?))
}

fn convert(schema: &Value, defs: Option<&Value>, stack: &mut Vec<String>) -> FieldSchema {
    if stack.len() > MAX_DEPTH {
        return FieldSchema::object();
    }
    let (schema, pushed) = match resolve(schema, defs) {
        Some((name, _)) if stack.iter().any(|s| s == name) => return FieldSchema::object(),
        Some((name, target)) => {
            stack.push(name.to_string());
            (target, true)
        }
        None => (schema, false),
    };
    let mut out = FieldSchema::object();
    if let Some(props) = schema.get("properties").and_then(Value::as_object) {
        for (name, sub) in props {
            out.fields.insert(name.clone(), convert(sub, defs, stack));
        }
    }
    if let Some(extra) = schema.get("additionalProperties").filter(|v| v.is_object()) {
        out.values = Some(Box::new(convert(extra, defs, stack)));
    }
    if let Some(items) = schema.get("items") {
        out.items = Some(Box::new(convert(items, defs, stack)));
        out.list = Some(list_type(schema));
    }
    if pushed {
        stack.pop();
    }
    out
}

fn strings(v: Option<&Value>) -> Vec<String> {
    v.and_then(Value::as_array).map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect()).unwrap_or_default()
}

fn list_type(schema: &Value) -> ListType {
    match schema.get("x-kubernetes-list-type").and_then(Value::as_str) {
        Some("map") => return ListType::Associative(strings(schema.get("x-kubernetes-list-map-keys"))),
        Some(_) => return ListType::Atomic,
        None => {}
    }
    let strategy = schema.get("x-kubernetes-patch-strategy").and_then(Value::as_str).unwrap_or("");
    if strategy.split(',').any(|s| s.trim() == "merge") {
        let key = schema.get("x-kubernetes-patch-merge-key").and_then(Value::as_str);
        return ListType::Associative(key.map(|k| vec![k.to_string()]).unwrap_or_default());
    }
    ListType::Atomic
}

/// Schemas of custom resources, keyed by `(apiVersion, kind)`.
#[derive(Debug, Clone, Default)]
pub struct CrdSchemas {
    by_type: HashMap<(String, String), FieldSchema>,
}

impl CrdSchemas {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.by_type.len() }
    pub fn is_empty(&self) -> bool { self.by_type.is_empty() }

    /// Take over types not registered yet; known types keep their first schema.
    pub fn extend(&mut self, other: CrdSchemas) {
        for (key, schema) in other.by_type {
            self.by_type.entry(key).or_insert(schema);
        }
    }

    /// Register every version of a CustomResourceDefinition document. Versions without their own schema fall
    /// back to the legacy `spec.validation.openAPIV3Schema`.
    pub fn add_crd(&mut self, crd: &Value) -> std::result::Result<usize, SchemaError> {
        let spec = crd.get("spec").ok_or_else(|| SchemaError::InvalidCrd("missing spec".into()))?;
        let group = spec.get("group").and_then(Value::as_str).ok_or_else(|| SchemaError::InvalidCrd("missing spec.group".into()))?;
        let kind = spec
            .get("names")
            .and_then(|n| n.get("kind"))
            .and_then(Value::as_str)
            .ok_or_else(|| SchemaError::InvalidCrd("missing spec.names.kind".into()))?;
        let legacy = spec.get("validation").and_then(|v| v.get("openAPIV3Schema"));
        let mut added = 0;
        for ver in spec.get("versions").and_then(Value::as_array).into_iter().flatten() {
            let Some(name) = ver.get("name").and_then(Value::as_str) else { continue };
            let Some(schema) = ver.get("schema").and_then(|s| s.get("openAPIV3Schema")).or(legacy) else { continue };
            self.by_type.insert((format!("{group}/{name}"), kind.to_string()), FieldSchema::from_openapi(schema));
            added += 1;
        }
        if added == 0 {
            if let (Some(version), Some(schema)) = (spec.get("version").and_then(Value::as_str), legacy) {
                self.by_type.insert((format!("{group}/{version}"), kind.to_string()), FieldSchema::from_openapi(schema));
                added += 1;
            }
        }
        debug!(group, kind, versions = added, "registered CRD schema");
        Ok(added)
    }

    /// Register every CRD among `docs`; other documents are ignored.
    pub fn add_documents<'a, I>(&mut self, docs: I) -> std::result::Result<usize, SchemaError>
    where
        I: IntoIterator<Item = &'a Value>,
    {
        let mut total = 0;
        for doc in docs {
            if doc.get("kind").and_then(Value::as_str) == Some("CustomResourceDefinition") {
                total += self.add_crd(doc)?;
            }
        }
        Ok(total)
    }
}

impl SchemaSource for CrdSchemas {
    fn lookup(&self, api_version: &str, kind: &str) -> Option<FieldSchema> {
        self.by_type.get(&(api_version.to_string(), kind.to_string())).cloned()
    }
}

/// List the cluster's CustomResourceDefinitions and convert their schemas.
pub async fn fetch_crd_schemas(client: kube::Client) -> Result<CrdSchemas> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1 as apiextv1;
    use kube::{api::ListParams, Api};

    let api: Api<apiextv1::CustomResourceDefinition> = Api::all(client);
    let crds = api.list(&ListParams::default()).await.context("listing CustomResourceDefinitions")?;
    let mut out = CrdSchemas::new();
    for crd in crds {
        let v = serde_json::to_value(&crd).context("serializing CustomResourceDefinition")?;
        out.add_crd(&v).with_context(|| format!("converting CRD {}", crd.metadata.name.as_deref().unwrap_or("?")))?;
    }
    info!(types = out.len(), "loaded CRD schemas");
    Ok(out)
}
