//! kfold schema: field schemas telling the aligner which lists are associative and by which keys.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

mod builtin;
mod openapi;
mod registry;

pub use builtin::BuiltinSchemas;
pub use openapi::{fetch_crd_schemas, CrdSchemas};
pub use registry::SchemaRegistry;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("invalid CRD: {0}")]
    InvalidCrd(String),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// How list elements are matched when merging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListType {
    /// Replaced as a whole.
    Atomic,
    /// Merged element-wise by the given key fields. Empty keys mean "associative, key unknown".
    Associative(Vec<String>),
}

/// Structural schema of a document subtree. Only the parts relevant to alignment are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSchema {
    fields: BTreeMap<String, FieldSchema>,
    values: Option<Box<FieldSchema>>,
    items: Option<Box<FieldSchema>>,
    list: Option<ListType>,
}

impl FieldSchema {
    pub fn object() -> Self { Self::default() }

    pub fn with_field(mut self, name: impl Into<String>, schema: FieldSchema) -> Self {
        self.fields.insert(name.into(), schema);
        self
    }

    /// Schema shared by every value of a free-form map (`additionalProperties`).
    pub fn with_values(mut self, schema: FieldSchema) -> Self {
        self.values = Some(Box::new(schema));
        self
    }

    pub fn list(items: FieldSchema) -> Self { Self { items: Some(Box::new(items)), list: Some(ListType::Atomic), ..Self::default() } }

    pub fn keyed_list(keys: &[&str], items: FieldSchema) -> Self {
        let keys = keys.iter().map(|k| k.to_string()).collect();
        Self { items: Some(Box::new(items)), list: Some(ListType::Associative(keys)), ..Self::default() }
    }

    /// Associative list whose key must be inferred from the elements.
    pub fn associative(items: FieldSchema) -> Self {
        Self { items: Some(Box::new(items)), list: Some(ListType::Associative(Vec::new())), ..Self::default() }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> { self.fields.get(name).or(self.values.as_deref()) }

    pub fn elements(&self) -> Option<&FieldSchema> { self.items.as_deref() }

    pub fn list_type(&self) -> Option<&ListType> { self.list.as_ref() }

    pub fn is_associative(&self) -> bool { matches!(self.list, Some(ListType::Associative(_))) }

    /// Merge keys of an associative list; `Some(&[])` when associative without declared keys.
    pub fn merge_keys(&self) -> Option<&[String]> {
        match &self.list {
            Some(ListType::Associative(keys)) => Some(keys),
            _ => None,
        }
    }
}

/// Provider of per-type schemas. Implementations are consulted in registration order.
pub trait SchemaSource: Send + Sync {
    fn lookup(&self, api_version: &str, kind: &str) -> Option<FieldSchema>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_falls_back_to_map_values() {
        let s = FieldSchema::object()
            .with_field("known", FieldSchema::list(FieldSchema::object()))
            .with_values(FieldSchema::keyed_list(&["name"], FieldSchema::object()));
        assert_eq!(s.field("known").and_then(FieldSchema::list_type), Some(&ListType::Atomic));
        assert_eq!(s.field("other").and_then(FieldSchema::merge_keys), Some(&["name".to_string()][..]));
    }

    #[test]
    fn associative_without_keys() {
        let s = FieldSchema::associative(FieldSchema::object());
        assert!(s.is_associative());
        assert_eq!(s.merge_keys(), Some(&[][..]));
        assert!(FieldSchema::object().merge_keys().is_none());
    }
}
