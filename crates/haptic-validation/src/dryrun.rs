//! Admission dry-run validation
//!
//! Proves that a proposed cluster change still renders to a syntactically
//! valid HAProxy configuration before the API server admits it. The change
//! is simulated through a read-only overlay over the live stores; copying a
//! store with 10^4+ resources per admission request would be prohibitive.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use haptic_config::Config;
use haptic_core::{Error, OverlayOp, OverlayStore, Resource, Result, Store, StoreRead};
use haptic_renderer::{Renderer, StoreSet};
use haptic_template::{EngineType, FilterSet, FunctionSet, PathResolver, TemplateEngine};

use crate::haproxy::HaproxyCheck;

/// One change under admission review.
#[derive(Debug, Clone)]
pub struct ProposedChange {
    pub resource_type: String,
    pub namespace: String,
    pub name: String,
    pub op: OverlayOp,
    /// Required for create/update; ignored for delete
    pub object: Option<Resource>,
}

/// Admission verdict with a human-readable reason on rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl Admission {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny<S: Into<String>>(reason: S) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Renders a proposed change through an overlay and syntax-checks the result.
pub struct DryRunValidator {
    config: Arc<Config>,
    haproxy: HaproxyCheck,
}

impl DryRunValidator {
    pub fn new(config: Arc<Config>, haproxy: HaproxyCheck) -> Self {
        Self { config, haproxy }
    }

    /// Validate one change against the live stores.
    ///
    /// Renders into a fresh temp directory (removed on return, success or
    /// not) with a context identical to the production renderer's, the
    /// target type's store replaced by the overlay.
    pub async fn validate_change(
        &self,
        stores: &BTreeMap<String, Arc<Store>>,
        change: &ProposedChange,
    ) -> Result<Admission> {
        let Some(base) = stores.get(&change.resource_type) else {
            // not a watched type; nothing we render can depend on it
            debug!(resource_type = %change.resource_type, "change targets an unwatched type, admitting");
            return Ok(Admission::allow());
        };

        let target_key = match &change.object {
            Some(object) => base.indexer().extract_keys(object),
            None => vec![change.namespace.clone(), change.name.clone()],
        };
        let overlay = OverlayStore::new(
            Arc::clone(base),
            change.op,
            target_key,
            change.object.clone(),
        )?;

        let mut store_set = StoreSet::new();
        for (resource_type, store) in stores {
            store_set.insert(
                resource_type.clone(),
                Arc::clone(store) as Arc<dyn StoreRead>,
            );
        }
        let store_set = store_set.with_replaced(
            &change.resource_type,
            Arc::new(overlay) as Arc<dyn StoreRead>,
        );

        let temp_dir = tempfile::tempdir()?;
        let engine = TemplateEngine::new(
            EngineType::Jinja2,
            self.config.templates.flat_namespace()?,
            FilterSet::standard(),
            FunctionSet::standard(),
            self.config.post_processors.clone(),
            PathResolver::rooted_at(temp_dir.path()),
        )?;
        let renderer = Renderer::with_engine(Arc::new(engine), &self.config);

        let bundle = match renderer.render_with_stores(&store_set) {
            Ok(bundle) => bundle,
            Err(e) => {
                let reason = Error::simplify_render_message(&e.to_string());
                info!(
                    resource_type = %change.resource_type,
                    namespace = %change.namespace,
                    name = %change.name,
                    "rejecting change: rendering failed"
                );
                return Ok(Admission::deny(format!(
                    "configuration would fail to render: {reason}"
                )));
            }
        };

        match self.haproxy.validate(&bundle, temp_dir.path()).await {
            Ok(()) => Ok(Admission::allow()),
            Err(Error::HaproxyInvalid { diagnostic }) => {
                info!(
                    resource_type = %change.resource_type,
                    namespace = %change.namespace,
                    name = %change.name,
                    "rejecting change: haproxy check failed"
                );
                Ok(Admission::deny(format!(
                    "configuration would be rejected by haproxy: {diagnostic}"
                )))
            }
            Err(other) => Err(other),
        }
    }
}
