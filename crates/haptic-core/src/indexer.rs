//! Composite key extraction from resources
//!
//! An [`Indexer`] turns a resource into the ordered tuple of strings a
//! [`crate::Store`] files it under, and masks ignore-fields so status churn
//! does not perturb content comparisons.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde_json::Value;

use crate::Resource;

/// Ordered tuple of stringified field values; length equals `index_by` length.
pub type IndexKey = Vec<String>;

/// Extracts index keys and masked views from resources.
#[derive(Debug, Clone)]
pub struct Indexer {
    index_by: Vec<String>,
    ignore_fields: Vec<String>,
}

impl Indexer {
    pub fn new(index_by: Vec<String>, ignore_fields: Vec<String>) -> Self {
        Self {
            index_by,
            ignore_fields,
        }
    }

    /// Number of components in keys produced by this indexer
    pub fn key_len(&self) -> usize {
        self.index_by.len()
    }

    /// Extract the index key tuple.
    ///
    /// Element *i* is the stringified value at `index_by[i]`; a missing path
    /// or a traversal through a non-object yields the empty string.
    pub fn extract_keys(&self, resource: &Resource) -> IndexKey {
        self.index_by
            .iter()
            .map(|path| stringify(resource.get_path(path)))
            .collect()
    }

    /// Return a copy of the resource with every ignore-field subtree nulled.
    pub fn masked(&self, resource: &Resource) -> Resource {
        let mut value = resource.as_value().clone();
        for path in &self.ignore_fields {
            blank_path(&mut value, path);
        }
        // a blanked object is still an object
        Resource::new(value).unwrap_or_else(|_| resource.clone())
    }

    /// Hash the masked resource's canonical JSON serialization.
    ///
    /// Equal resources that differ only in ignore-fields hash identically.
    pub fn content_hash(&self, resource: &Resource) -> u64 {
        let masked = self.masked(resource);
        let canonical =
            serde_json::to_string(masked.as_value()).unwrap_or_default();
        let mut hasher = DefaultHasher::new();
        canonical.hash(&mut hasher);
        hasher.finish()
    }
}

fn stringify(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn blank_path(value: &mut Value, path: &str) {
    let mut current = value;
    let segments: Vec<&str> = path.split('.').collect();
    for (i, segment) in segments.iter().enumerate() {
        let Some(map) = current.as_object_mut() else {
            return;
        };
        if i == segments.len() - 1 {
            if let Some(slot) = map.get_mut(*segment) {
                *slot = Value::Null;
            }
            return;
        }
        match map.get_mut(*segment) {
            Some(next) => current = next,
            None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resource(value: Value) -> Resource {
        Resource::new(value).unwrap()
    }

    #[test]
    fn test_extract_keys_basic() {
        let indexer = Indexer::new(
            vec!["metadata.namespace".into(), "metadata.name".into()],
            vec![],
        );
        let r = resource(json!({
            "metadata": {"namespace": "default", "name": "web"}
        }));
        assert_eq!(indexer.extract_keys(&r), vec!["default", "web"]);
    }

    #[test]
    fn test_extract_keys_missing_yields_empty() {
        let indexer = Indexer::new(
            vec!["metadata.namespace".into(), "spec.missing".into()],
            vec![],
        );
        let r = resource(json!({"metadata": {"namespace": "ns"}}));
        assert_eq!(indexer.extract_keys(&r), vec!["ns", ""]);
    }

    #[test]
    fn test_extract_keys_non_map_traversal_aborts() {
        let indexer = Indexer::new(vec!["spec.clusterIP.octet".into()], vec![]);
        let r = resource(json!({"spec": {"clusterIP": "10.0.0.1"}}));
        assert_eq!(indexer.extract_keys(&r), vec![""]);
    }

    #[test]
    fn test_extract_keys_canonical_scalars() {
        let indexer = Indexer::new(
            vec!["spec.port".into(), "spec.enabled".into()],
            vec![],
        );
        let r = resource(json!({"spec": {"port": 8080, "enabled": true}}));
        assert_eq!(indexer.extract_keys(&r), vec!["8080", "true"]);
    }

    #[test]
    fn test_content_hash_ignores_masked_fields() {
        let indexer = Indexer::new(
            vec!["metadata.name".into()],
            vec!["status".into()],
        );
        let a = resource(json!({
            "metadata": {"name": "web"},
            "status": {"observedGeneration": 1}
        }));
        let b = resource(json!({
            "metadata": {"name": "web"},
            "status": {"observedGeneration": 7}
        }));
        assert_eq!(indexer.content_hash(&a), indexer.content_hash(&b));
    }

    #[test]
    fn test_content_hash_detects_real_change() {
        let indexer = Indexer::new(vec!["metadata.name".into()], vec!["status".into()]);
        let a = resource(json!({"metadata": {"name": "web"}, "spec": {"replicas": 1}}));
        let b = resource(json!({"metadata": {"name": "web"}, "spec": {"replicas": 2}}));
        assert_ne!(indexer.content_hash(&a), indexer.content_hash(&b));
    }

    #[test]
    fn test_masked_blanks_nested_path() {
        let indexer = Indexer::new(vec![], vec!["metadata.annotations".into()]);
        let r = resource(json!({
            "metadata": {"name": "web", "annotations": {"a": "1"}}
        }));
        let masked = indexer.masked(&r);
        assert_eq!(masked.get_path("metadata.annotations"), Some(&Value::Null));
        assert_eq!(
            masked.get_path("metadata.name").and_then(Value::as_str),
            Some("web")
        );
    }
}
