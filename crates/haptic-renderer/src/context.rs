//! Rendering context assembly
//!
//! The context every template sees:
//! - `resources.<type>` — store handles with `list()` / `get(keys...)`
//! - `controller.haproxy_pods` — the controller's own pod store
//! - `snippets` — snippet names ordered by `(priority, name)`
//! - `file_registry` — dynamic auxiliary file registration
//! - `pathresolver` — the four dataplane directories
//! - `http_fixtures` — test-injected URL responses, when present
//! - user extra-context keys merged at top level

use std::collections::BTreeMap;
use std::sync::Arc;

use minijinja::value::{Enumerator, Object, Value};

use haptic_template::{FileRegistry, PathResolver};

use crate::stores::{StoreHandle, StoreSet};

/// The context of one rendering pass, in both template and JSON form.
///
/// The JSON projection mirrors the template view with stores expanded to
/// their listed resources; JSONPath assertions evaluate against it.
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub value: Value,
    pub json: serde_json::Value,
}

/// String-keyed map usable as a minijinja object without serialization,
/// which would strip methods from nested store handles.
#[derive(Debug)]
struct ContextMap(BTreeMap<String, Value>);

impl Object for ContextMap {
    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        self.0.get(key.as_str()?).cloned()
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Values(self.0.keys().map(|k| Value::from(k.as_str())).collect())
    }
}

fn map_value(entries: BTreeMap<String, Value>) -> Value {
    Value::from_object(ContextMap(entries))
}

/// Assemble the rendering context.
pub fn build_context(
    stores: &StoreSet,
    registry: &Arc<FileRegistry>,
    snippet_names: &[String],
    resolver: &PathResolver,
    extra_context: &serde_json::Map<String, serde_json::Value>,
    http_fixtures: Option<&BTreeMap<String, String>>,
) -> RenderContext {
    let mut root: BTreeMap<String, Value> = BTreeMap::new();
    let mut json_root = serde_json::Map::new();

    // resources.<type>
    let mut resource_entries: BTreeMap<String, Value> = BTreeMap::new();
    let mut resource_json = serde_json::Map::new();
    for resource_type in stores.resource_types() {
        let store = stores
            .get(resource_type)
            .expect("resource_types yields existing stores");
        let listed: Vec<serde_json::Value> = store
            .list()
            .into_iter()
            .map(haptic_core::Resource::into_value)
            .collect();
        resource_json.insert(resource_type.to_string(), serde_json::Value::Array(listed));
        resource_entries.insert(
            resource_type.to_string(),
            Value::from_object(StoreHandle(store)),
        );
    }
    root.insert("resources".to_string(), map_value(resource_entries));
    json_root.insert(
        "resources".to_string(),
        serde_json::Value::Object(resource_json),
    );

    // controller.haproxy_pods
    let pods = stores.haproxy_pods();
    let pods_json: Vec<serde_json::Value> = pods
        .list()
        .into_iter()
        .map(haptic_core::Resource::into_value)
        .collect();
    root.insert(
        "controller".to_string(),
        map_value(BTreeMap::from([(
            "haproxy_pods".to_string(),
            Value::from_object(StoreHandle(pods)),
        )])),
    );
    json_root.insert(
        "controller".to_string(),
        serde_json::json!({ "haproxy_pods": pods_json }),
    );

    // ordered snippet names
    root.insert(
        "snippets".to_string(),
        Value::from_serialize(snippet_names),
    );
    json_root.insert(
        "snippets".to_string(),
        serde_json::json!(snippet_names),
    );

    // dynamic file registration
    root.insert(
        "file_registry".to_string(),
        Value::from_dyn_object(Arc::clone(registry)),
    );

    // dataplane directories
    let paths = serde_json::json!({
        "maps_dir": resolver.maps_dir().display().to_string(),
        "ssl_dir": resolver.ssl_dir().display().to_string(),
        "crt_list_dir": resolver.crt_list_dir().display().to_string(),
        "general_dir": resolver.general_dir().display().to_string(),
    });
    root.insert("pathresolver".to_string(), Value::from_serialize(&paths));
    json_root.insert("pathresolver".to_string(), paths);

    if let Some(fixtures) = http_fixtures {
        root.insert(
            "http_fixtures".to_string(),
            Value::from_serialize(fixtures),
        );
        json_root.insert(
            "http_fixtures".to_string(),
            serde_json::json!(fixtures),
        );
    }

    // user extra context merged at top level; reserved keys win
    for (key, value) in extra_context {
        if !root.contains_key(key) {
            root.insert(key.clone(), Value::from_serialize(value));
            json_root.insert(key.clone(), value.clone());
        }
    }

    RenderContext {
        value: map_value(root),
        json: serde_json::Value::Object(json_root),
    }
}
