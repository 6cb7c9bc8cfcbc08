//! Read-only overlay simulating one mutation over a base store
//!
//! Admission dry-runs must answer "would the config still be valid if this
//! change were applied" without copying stores that may hold tens of
//! thousands of resources. The overlay holds the base by reference plus the
//! single proposed delta; memory cost is O(1), `list` pays one extra O(n)
//! pass.

use std::sync::Arc;

use crate::{Error, IndexKey, Resource, Result, Store, StoreRead};

/// The simulated CRUD operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayOp {
    Create,
    Update,
    Delete,
}

/// Immutable store view applying one pending change to a base [`Store`].
pub struct OverlayStore {
    base: Arc<Store>,
    op: OverlayOp,
    target_key: IndexKey,
    object: Option<Resource>,
}

impl OverlayStore {
    /// Build an overlay for the given operation.
    ///
    /// `object` is required for `Create`/`Update` and ignored for `Delete`.
    pub fn new(
        base: Arc<Store>,
        op: OverlayOp,
        target_key: IndexKey,
        object: Option<Resource>,
    ) -> Result<Self> {
        if target_key.len() != base.indexer().key_len() {
            return Err(Error::config(format!(
                "overlay target key has {} components, base index has {}",
                target_key.len(),
                base.indexer().key_len()
            )));
        }
        if matches!(op, OverlayOp::Create | OverlayOp::Update) && object.is_none() {
            return Err(Error::config(
                "overlay create/update requires the proposed object",
            ));
        }
        Ok(Self {
            base,
            op,
            target_key,
            object,
        })
    }

    /// Writes are a programming error against an overlay.
    pub fn add(&self, _resource: Resource) -> Result<()> {
        Err(Error::StoreReadOnly)
    }

    /// Writes are a programming error against an overlay.
    pub fn update(&self, _resource: Resource) -> Result<()> {
        Err(Error::StoreReadOnly)
    }

    /// Writes are a programming error against an overlay.
    pub fn delete(&self, _resource: &Resource) -> Result<()> {
        Err(Error::StoreReadOnly)
    }

    fn key_matches_target(&self, resource: &Resource) -> bool {
        self.base.indexer().extract_keys(resource) == self.target_key
    }
}

impl StoreRead for OverlayStore {
    fn get(&self, keys: &[String]) -> Result<Vec<Resource>> {
        // full-key match on the overlaid target short-circuits
        if keys == self.target_key.as_slice() {
            return Ok(match self.op {
                OverlayOp::Delete => Vec::new(),
                OverlayOp::Create | OverlayOp::Update => {
                    self.object.clone().into_iter().collect()
                }
            });
        }

        let mut results: Vec<Resource> = self
            .base
            .get(keys)?
            .into_iter()
            .filter(|r| !self.key_matches_target(r))
            .collect();

        // prefix lookups covering the target include the overlay object
        if self.target_key.starts_with(keys) {
            match self.op {
                OverlayOp::Delete => {}
                OverlayOp::Create | OverlayOp::Update => {
                    results.extend(self.object.clone());
                }
            }
        }
        Ok(results)
    }

    fn list(&self) -> Vec<Resource> {
        let mut seen_target = false;
        let mut results: Vec<Resource> = Vec::new();
        for resource in self.base.list() {
            if self.key_matches_target(&resource) {
                seen_target = true;
                match self.op {
                    OverlayOp::Delete => {}
                    OverlayOp::Create | OverlayOp::Update => {
                        results.extend(self.object.clone());
                    }
                }
            } else {
                results.push(resource);
            }
        }
        if !seen_target && matches!(self.op, OverlayOp::Create | OverlayOp::Update) {
            results.extend(self.object.clone());
        }
        results
    }

    fn len(&self) -> usize {
        let base_len = self.base.len();
        let base_has_target = self
            .base
            .get(&self.target_key)
            .map(|items| !items.is_empty())
            .unwrap_or(false);
        match (self.op, base_has_target) {
            (OverlayOp::Delete, true) => base_len - 1,
            (OverlayOp::Delete, false) => base_len,
            (OverlayOp::Create | OverlayOp::Update, true) => base_len,
            (OverlayOp::Create | OverlayOp::Update, false) => base_len + 1,
        }
    }
}
