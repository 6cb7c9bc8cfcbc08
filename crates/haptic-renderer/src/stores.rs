//! Store handles exposed to templates
//!
//! Templates see each store as an object with `list()` and `get(keys...)`
//! methods; production stores and admission overlays share the
//! [`StoreRead`] trait, so both render through the identical path.

use std::collections::BTreeMap;
use std::sync::Arc;

use minijinja::value::{Object, Value};
use minijinja::{Error as MjError, ErrorKind, State};

use haptic_core::{Indexer, Store, StoreRead};

/// Reserved store name for the controller's own HAProxy pods.
pub const HAPROXY_PODS_STORE: &str = "haproxy-pods";

/// Named collection of read handles, one per resource type.
#[derive(Clone, Default)]
pub struct StoreSet {
    stores: BTreeMap<String, Arc<dyn StoreRead>>,
}

impl StoreSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<S: Into<String>>(&mut self, resource_type: S, store: Arc<dyn StoreRead>) {
        self.stores.insert(resource_type.into(), store);
    }

    pub fn get(&self, resource_type: &str) -> Option<Arc<dyn StoreRead>> {
        self.stores.get(resource_type).cloned()
    }

    pub fn contains(&self, resource_type: &str) -> bool {
        self.stores.contains_key(resource_type)
    }

    /// Resource types excluding the reserved controller store.
    pub fn resource_types(&self) -> impl Iterator<Item = &str> {
        self.stores
            .keys()
            .map(String::as_str)
            .filter(|t| *t != HAPROXY_PODS_STORE)
    }

    /// The controller pod store; an empty `(namespace, name)` store when
    /// none was registered, so templates can always call `list()`.
    pub fn haproxy_pods(&self) -> Arc<dyn StoreRead> {
        self.stores.get(HAPROXY_PODS_STORE).cloned().unwrap_or_else(|| {
            Arc::new(Store::new(Indexer::new(
                vec!["metadata.namespace".into(), "metadata.name".into()],
                vec![],
            )))
        })
    }

    /// Swap one resource type's handle, returning a copy; the original set
    /// is untouched. Used to splice an overlay in for dry-runs.
    pub fn with_replaced(&self, resource_type: &str, store: Arc<dyn StoreRead>) -> Self {
        let mut replaced = self.clone();
        replaced.insert(resource_type, store);
        replaced
    }
}

impl std::fmt::Debug for StoreSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.stores.iter().map(|(k, v)| (k, v.len())))
            .finish()
    }
}

/// Template-facing wrapper over one store.
#[derive(Clone)]
pub struct StoreHandle(pub Arc<dyn StoreRead>);

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StoreHandle").field(&self.0.len()).finish()
    }
}

impl Object for StoreHandle {
    fn call_method(
        self: &Arc<Self>,
        _state: &State<'_, '_>,
        method: &str,
        args: &[Value],
    ) -> Result<Value, MjError> {
        match method {
            "list" => {
                let resources: Vec<serde_json::Value> =
                    self.0.list().into_iter().map(|r| r.into_value()).collect();
                Ok(Value::from_serialize(&resources))
            }
            "get" => {
                let keys: Vec<String> = args
                    .iter()
                    .map(|arg| {
                        arg.as_str().map(str::to_string).ok_or_else(|| {
                            MjError::new(
                                ErrorKind::InvalidOperation,
                                "get() takes string key components",
                            )
                        })
                    })
                    .collect::<Result<_, _>>()?;
                let resources = self.0.get(&keys).map_err(|e| {
                    MjError::new(ErrorKind::InvalidOperation, e.to_string())
                })?;
                let resources: Vec<serde_json::Value> =
                    resources.into_iter().map(|r| r.into_value()).collect();
                Ok(Value::from_serialize(&resources))
            }
            "len" => Ok(Value::from(self.0.len())),
            _ => Err(MjError::new(
                ErrorKind::UnknownMethod,
                format!("store has no method '{method}'"),
            )),
        }
    }
}
