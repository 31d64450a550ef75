use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use kfold_core::ResourceId;
use metrics::counter;
use tracing::debug;

use crate::{BuiltinSchemas, FieldSchema, SchemaSource};

type TypeKey = (String, String);

/// Memoizing schema lookup over an ordered list of sources. Owned by whoever drives the emitters.
#[derive(Default)]
pub struct SchemaRegistry {
    sources: Vec<Box<dyn SchemaSource>>,
    cache: RwLock<HashMap<TypeKey, Option<Arc<FieldSchema>>>>,
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry").field("sources", &self.sources.len()).finish_non_exhaustive()
    }
}

impl SchemaRegistry {
    /// Registry without any source: every list is treated as opaque.
    pub fn new() -> Self { Self::default() }

    /// Registry preloaded with [`BuiltinSchemas`].
    pub fn with_builtin() -> Self { Self::new().with_source(BuiltinSchemas) }

    pub fn with_source(mut self, source: impl SchemaSource + 'static) -> Self {
        self.push(source);
        self
    }

    /// Add a source consulted after the existing ones. Cached misses are dropped.
    pub fn push(&mut self, source: impl SchemaSource + 'static) {
        self.sources.push(Box::new(source));
        if let Ok(mut cache) = self.cache.write() {
            cache.retain(|_, v| v.is_some());
        }
    }

    pub fn lookup(&self, api_version: &str, kind: &str) -> Option<Arc<FieldSchema>> {
        let key = (api_version.to_string(), kind.to_string());
        if let Some(hit) = self.cache.read().ok().and_then(|c| c.get(&key).cloned()) {
            counter!("schema_cache_hit_total", 1u64);
            return hit;
        }
        counter!("schema_cache_miss_total", 1u64);
        let found = self.sources.iter().find_map(|s| s.lookup(api_version, kind)).map(Arc::new);
        debug!(api_version, kind, found = found.is_some(), "schema lookup");
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(key, found.clone());
        }
        found
    }

    pub fn resolve(&self, id: &ResourceId) -> Option<Arc<FieldSchema>> { self.lookup(&id.api_version, &id.kind) }
}
