//! Resource stores and cluster watchers
//!
//! One indexed store per watched resource type, filled by a kube watcher
//! over the dynamic API. The watcher publishes `ResourceChanged` on every
//! store write and `ResourceSyncComplete` exactly once, after the initial
//! list has been ingested.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt;
use kube::api::{Api, ApiResource, DynamicObject};
use kube::runtime::watcher;
use kube::Client;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use haptic_config::Config;
use haptic_core::{Event, EventBus, Indexer, Resource, Store, StoreRead, WatchedResourceSpec};
use haptic_renderer::{StoreSet, HAPROXY_PODS_STORE};

use crate::{OperatorError, Result};

/// The live stores of one config revision.
#[derive(Debug, Clone)]
pub struct ResourceStores {
    stores: BTreeMap<String, Arc<Store>>,
}

impl ResourceStores {
    /// One empty store per watched resource spec plus the reserved
    /// controller pod store.
    pub fn for_config(config: &Config) -> Self {
        let mut stores = BTreeMap::new();
        for (resource_type, spec) in &config.watched_resources {
            stores.insert(
                resource_type.clone(),
                Arc::new(Store::new(Indexer::new(
                    spec.index_by.clone(),
                    spec.ignore_fields.clone(),
                ))),
            );
        }
        stores.insert(
            HAPROXY_PODS_STORE.to_string(),
            Arc::new(Store::new(Indexer::new(
                vec!["metadata.namespace".into(), "metadata.name".into()],
                vec![],
            ))),
        );
        Self { stores }
    }

    pub fn get(&self, resource_type: &str) -> Option<Arc<Store>> {
        self.stores.get(resource_type).cloned()
    }

    pub fn as_map(&self) -> &BTreeMap<String, Arc<Store>> {
        &self.stores
    }

    /// Read-only view for the renderer.
    pub fn store_set(&self) -> StoreSet {
        let mut set = StoreSet::new();
        for (resource_type, store) in &self.stores {
            set.insert(
                resource_type.clone(),
                Arc::clone(store) as Arc<dyn StoreRead>,
            );
        }
        set
    }
}

/// Dynamic API coordinates for a watched resource spec.
pub fn api_resource_for(spec: &WatchedResourceSpec) -> ApiResource {
    let (group, version) = match spec.api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), spec.api_version.clone()),
    };
    // the dynamic API routes by group/version/plural; kind is only used in
    // diagnostics, a singular guess is good enough
    let kind = singularize(&spec.resource_type);
    ApiResource {
        api_version: spec.api_version.clone(),
        group,
        version,
        kind,
        plural: spec.resource_type.clone(),
    }
}

fn singularize(plural: &str) -> String {
    let stem = plural.strip_suffix("es").filter(|s| s.ends_with("ss")).unwrap_or_else(|| {
        plural.strip_suffix('s').unwrap_or(plural)
    });
    let mut chars = stem.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Watch one resource type into its store until shutdown.
pub async fn watch_resource(
    client: Client,
    spec: WatchedResourceSpec,
    store: Arc<Store>,
    bus: Arc<EventBus>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let api_resource = api_resource_for(&spec);
    watch_into_store(
        client,
        api_resource,
        watcher::Config::default(),
        spec.resource_type,
        store,
        bus,
        shutdown,
    )
    .await
}

/// Watch the controller's own HAProxy pods into the reserved store.
pub async fn watch_haproxy_pods(
    client: Client,
    pod_selector: String,
    store: Arc<Store>,
    bus: Arc<EventBus>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let api_resource = ApiResource {
        api_version: "v1".to_string(),
        group: String::new(),
        version: "v1".to_string(),
        kind: "Pod".to_string(),
        plural: "pods".to_string(),
    };
    watch_into_store(
        client,
        api_resource,
        watcher::Config::default().labels(&pod_selector),
        HAPROXY_PODS_STORE.to_string(),
        store,
        bus,
        shutdown,
    )
    .await
}

async fn watch_into_store(
    client: Client,
    api_resource: ApiResource,
    watcher_config: watcher::Config,
    resource_type: String,
    store: Arc<Store>,
    bus: Arc<EventBus>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let api: Api<DynamicObject> = Api::all_with(client, &api_resource);
    let stream = watcher(api, watcher_config);
    futures::pin_mut!(stream);

    info!(%resource_type, "watching resources");
    let mut synced = false;
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!(%resource_type, "watcher shutting down");
                    return Ok(());
                }
            }
            event = stream.next() => {
                let Some(event) = event else {
                    return Err(OperatorError::WatchEnded(format!(
                        "watch stream for '{resource_type}' ended unexpectedly"
                    )));
                };
                match event {
                    Ok(event) => {
                        handle_watch_event(&resource_type, &store, &bus, event, &mut synced)?;
                    }
                    Err(e) => {
                        warn!(%resource_type, error = %e, "watch error, backing off");
                    }
                }
            }
        }
    }
}

/// Apply one watch event to the store; publishes change and sync events.
pub fn handle_watch_event(
    resource_type: &str,
    store: &Store,
    bus: &EventBus,
    event: watcher::Event<DynamicObject>,
    synced: &mut bool,
) -> Result<()> {
    match event {
        watcher::Event::Applied(obj) => {
            let resource = to_resource(&obj)?;
            // ignore-field churn (status updates, resync echoes) must not
            // trigger reconciliation
            let key = store.indexer().extract_keys(&resource);
            let unchanged = store.get(&key)?.first().is_some_and(|existing| {
                store.indexer().content_hash(existing)
                    == store.indexer().content_hash(&resource)
            });
            store.update(resource)?;
            if !unchanged {
                bus.publish(Event::ResourceChanged {
                    resource_type: resource_type.to_string(),
                });
            }
        }
        watcher::Event::Deleted(obj) => {
            store.delete(&to_resource(&obj)?)?;
            bus.publish(Event::ResourceChanged {
                resource_type: resource_type.to_string(),
            });
        }
        watcher::Event::Restarted(objs) => {
            store.clear();
            for obj in &objs {
                store.update(to_resource(obj)?)?;
            }
            bus.publish(Event::ResourceChanged {
                resource_type: resource_type.to_string(),
            });
            if !*synced {
                *synced = true;
                info!(resource_type, count = objs.len(), "initial sync complete");
                bus.publish(Event::ResourceSyncComplete {
                    resource_type: resource_type.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn to_resource(obj: &DynamicObject) -> Result<Resource> {
    let value = serde_json::to_value(obj).map_err(haptic_core::Error::from)?;
    Ok(Resource::new(value)?)
}
