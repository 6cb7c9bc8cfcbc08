//! Multi-key indexed resource store
//!
//! One [`Store`] per watched resource type. The full index key maps to the
//! resource; one auxiliary index per proper prefix length serves partial-key
//! lookups. Writers take the exclusive side of a reader-writer lock, readers
//! return point-in-time snapshots.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use crate::{Error, IndexKey, Indexer, Resource, Result};

/// Read interface shared by [`Store`] and [`crate::OverlayStore`].
///
/// The renderer only ever needs this view, which is what lets an admission
/// dry-run swap an overlay in for the live store.
pub trait StoreRead: Send + Sync {
    /// Look up by full or partial key.
    ///
    /// A full key returns at most one resource; a proper prefix returns all
    /// resources whose key begins with it.
    fn get(&self, keys: &[String]) -> Result<Vec<Resource>>;

    /// Snapshot of all resources; mutations after the call are not visible.
    fn list(&self) -> Vec<Resource>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared store handle; watchers write, renderers read.
pub type SharedStore = Arc<Store>;

#[derive(Debug, Default)]
struct Inner {
    items: BTreeMap<IndexKey, Resource>,
    /// prefixes[i] indexes prefixes of length i+1, for 1..key_len-1
    prefixes: Vec<HashMap<IndexKey, BTreeSet<IndexKey>>>,
}

/// Indexed container for one watched resource type.
#[derive(Debug)]
pub struct Store {
    indexer: Indexer,
    inner: RwLock<Inner>,
}

impl Store {
    pub fn new(indexer: Indexer) -> Self {
        let prefix_count = indexer.key_len().saturating_sub(1);
        Self {
            indexer,
            inner: RwLock::new(Inner {
                items: BTreeMap::new(),
                prefixes: vec![HashMap::new(); prefix_count],
            }),
        }
    }

    pub fn indexer(&self) -> &Indexer {
        &self.indexer
    }

    /// Insert a resource; errors with [`Error::StoreCollision`] when a live
    /// resource already occupies the same key.
    pub fn add(&self, resource: Resource) -> Result<()> {
        let key = self.indexer.extract_keys(&resource);
        let mut inner = self.inner.write().expect("store lock poisoned");
        if inner.items.contains_key(&key) {
            return Err(Error::StoreCollision { key });
        }
        index_prefixes(&mut inner, &key);
        inner.items.insert(key, resource);
        Ok(())
    }

    /// Insert or replace the resource under its extracted key.
    pub fn update(&self, resource: Resource) -> Result<()> {
        let key = self.indexer.extract_keys(&resource);
        let mut inner = self.inner.write().expect("store lock poisoned");
        index_prefixes(&mut inner, &key);
        inner.items.insert(key, resource);
        Ok(())
    }

    /// Remove the resource stored under this resource's key, if any.
    pub fn delete(&self, resource: &Resource) -> Result<()> {
        let key = self.indexer.extract_keys(resource);
        self.delete_by_key(&key)
    }

    /// Remove by full index key.
    pub fn delete_by_key(&self, key: &[String]) -> Result<()> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        if inner.items.remove(key).is_some() {
            for (i, index) in inner.prefixes.iter_mut().enumerate() {
                let prefix = key[..=i].to_vec();
                if let Some(set) = index.get_mut(&prefix) {
                    set.remove(key);
                    if set.is_empty() {
                        index.remove(&prefix);
                    }
                }
            }
        }
        Ok(())
    }

    /// Drop every resource.
    pub fn clear(&self) {
        let mut inner = self.inner.write().expect("store lock poisoned");
        inner.items.clear();
        for index in &mut inner.prefixes {
            index.clear();
        }
    }
}

fn index_prefixes(inner: &mut Inner, key: &IndexKey) {
    for i in 0..inner.prefixes.len() {
        let prefix = key[..=i].to_vec();
        inner.prefixes[i]
            .entry(prefix)
            .or_default()
            .insert(key.clone());
    }
}

impl StoreRead for Store {
    fn get(&self, keys: &[String]) -> Result<Vec<Resource>> {
        let key_len = self.indexer.key_len();
        if keys.len() > key_len {
            return Err(Error::config(format!(
                "lookup key has {} components, index has {}",
                keys.len(),
                key_len
            )));
        }
        let inner = self.inner.read().expect("store lock poisoned");
        if keys.len() == key_len {
            return Ok(inner.items.get(keys).cloned().into_iter().collect());
        }
        if keys.is_empty() {
            return Ok(inner.items.values().cloned().collect());
        }
        let Some(full_keys) = inner.prefixes[keys.len() - 1].get(keys) else {
            return Ok(Vec::new());
        };
        Ok(full_keys
            .iter()
            .filter_map(|k| inner.items.get(k).cloned())
            .collect())
    }

    fn list(&self) -> Vec<Resource> {
        let inner = self.inner.read().expect("store lock poisoned");
        inner.items.values().cloned().collect()
    }

    fn len(&self) -> usize {
        let inner = self.inner.read().expect("store lock poisoned");
        inner.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> Store {
        Store::new(Indexer::new(
            vec!["metadata.namespace".into(), "metadata.name".into()],
            vec![],
        ))
    }

    fn service(namespace: &str, name: &str) -> Resource {
        Resource::new(json!({
            "metadata": {"namespace": namespace, "name": name}
        }))
        .unwrap()
    }

    #[test]
    fn test_add_get_roundtrip() {
        let store = store();
        let r = service("default", "web");
        store.add(r.clone()).unwrap();
        let key = store.indexer().extract_keys(&r);
        assert_eq!(store.get(&key).unwrap(), vec![r]);
    }

    #[test]
    fn test_add_collision() {
        let store = store();
        store.add(service("default", "web")).unwrap();
        let err = store.add(service("default", "web")).unwrap_err();
        assert!(matches!(err, Error::StoreCollision { .. }));
    }

    #[test]
    fn test_update_is_upsert() {
        let store = store();
        store.update(service("default", "web")).unwrap();
        store.update(service("default", "web")).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_prefix_get() {
        let store = store();
        store.add(service("default", "a")).unwrap();
        store.add(service("default", "b")).unwrap();
        store.add(service("kube-system", "dns")).unwrap();

        let defaults = store.get(&["default".to_string()]).unwrap();
        assert_eq!(defaults.len(), 2);

        let missing = store.get(&["nowhere".to_string()]).unwrap();
        assert!(missing.is_empty());
    }

    #[test]
    fn test_get_empty_key_lists_all() {
        let store = store();
        store.add(service("default", "a")).unwrap();
        store.add(service("other", "b")).unwrap();
        assert_eq!(store.get(&[]).unwrap().len(), 2);
    }

    #[test]
    fn test_get_too_many_components() {
        let store = store();
        let err = store
            .get(&["a".to_string(), "b".to_string(), "c".to_string()])
            .unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid { .. }));
    }

    #[test]
    fn test_delete_removes_from_prefix_index() {
        let store = store();
        let r = service("default", "web");
        store.add(r.clone()).unwrap();
        store.delete(&r).unwrap();
        assert!(store.get(&["default".to_string()]).unwrap().is_empty());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_list_snapshot_unaffected_by_later_writes() {
        let store = store();
        store.add(service("default", "a")).unwrap();
        let snapshot = store.list();
        store.add(service("default", "b")).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let store = Arc::new(store());
        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..200 {
                    store.update(service("default", &format!("svc-{i}"))).unwrap();
                }
            })
        };
        let reader = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for _ in 0..200 {
                    // every snapshot must be internally consistent
                    let items = store.list();
                    for item in items {
                        assert!(item.name().is_some());
                    }
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();
        assert_eq!(store.len(), 200);
    }
}
