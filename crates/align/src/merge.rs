use kfold_core::Node;
use kfold_schema::FieldSchema;

use crate::aligner::{list_keys, selector_of, DEFAULT_KEYS};

/// Apply `patch` onto `base` with strategic-merge semantics: mappings merge field by field, associative lists merge
/// element by element on their merge key (new elements appended), everything else is replaced.
pub fn strategic_merge(base: &mut Node, patch: &Node, schema: Option<&FieldSchema>) {
    match (base, patch) {
        (Node::Mapping(b), Node::Mapping(p)) => {
            for (k, pv) in p {
                let child = schema.and_then(|s| s.field(k));
                match b.get_mut(k) {
                    Some(bv) => strategic_merge(bv, pv, child),
                    None => {
                        b.insert(k.clone(), pv.clone());
                    }
                }
            }
        }
        (base @ Node::Sequence(_), Node::Sequence(p)) => {
            let common: Vec<String> = DEFAULT_KEYS.iter().map(|k| k.to_string()).collect();
            let Some(keys) = list_keys(schema, [&*base, patch], &common) else {
                *base = patch.clone();
                return;
            };
            let Node::Sequence(b) = base else { return };
            let element = schema.and_then(FieldSchema::elements);
            for item in p {
                let found = selector_of(item, &keys)
                    .ok()
                    .and_then(|sel| b.iter_mut().find(|e| selector_of(e, &keys).is_ok_and(|s| s.same_as(&sel))));
                match found {
                    Some(existing) => strategic_merge(existing, item, element),
                    None => b.push(item.clone()),
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}
