//! Shared helpers for HAPTIC integration tests

use std::sync::Arc;

use haptic_config::Config;
use haptic_core::{Indexer, Resource, Store, StoreRead};
use haptic_renderer::StoreSet;

/// Parse and validate a config document, panicking on any error.
pub fn load_config(yaml: &str) -> Config {
    let config = Config::from_yaml_str(yaml).expect("config parses");
    config.validate().expect("config validates");
    config
}

/// A minimal Service resource fixture.
pub fn service(namespace: &str, name: &str, cluster_ip: &str) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {"namespace": namespace, "name": name},
        "spec": {"clusterIP": cluster_ip, "ports": [{"port": 80}]}
    })
}

/// Build a `(namespace, name)`-indexed store holding the given resources.
pub fn store_of(resources: &[serde_json::Value]) -> Arc<Store> {
    let store = Store::new(Indexer::new(
        vec!["metadata.namespace".into(), "metadata.name".into()],
        vec!["status".into()],
    ));
    for resource in resources {
        store
            .add(Resource::new(resource.clone()).expect("fixture is an object"))
            .expect("no fixture key collisions");
    }
    Arc::new(store)
}

/// Wrap typed stores into the renderer's store set.
pub fn store_set(entries: &[(&str, Arc<Store>)]) -> StoreSet {
    let mut set = StoreSet::new();
    for (resource_type, store) in entries {
        set.insert(
            resource_type.to_string(),
            Arc::clone(store) as Arc<dyn StoreRead>,
        );
    }
    set
}
