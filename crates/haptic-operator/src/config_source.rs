//! Config revision loading and watching
//!
//! The authoritative source is the HAProxyTemplateConfig custom resource;
//! a ConfigMap of the same name is supported as the legacy fallback. Every
//! observed document is parsed and validated; a bad revision publishes
//! `ConfigInvalid` and leaves the previous revision active.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::runtime::watcher;
use kube::{Api, Client};
use tokio::sync::watch;
use tracing::{error, info, warn};

use haptic_config::Config;
use haptic_core::{Event, EventBus};

use crate::crd::HAProxyTemplateConfig;
use crate::{OperatorError, Result};

/// ConfigMap key holding the config document in legacy mode.
const CONFIGMAP_KEY: &str = "config";

/// Shared slot holding the active revision.
pub type ConfigSlot = watch::Receiver<Option<Arc<Config>>>;

/// Writer half of the config slot plus the bus to announce revisions on.
pub struct ConfigSource {
    bus: Arc<EventBus>,
    slot: watch::Sender<Option<Arc<Config>>>,
}

impl ConfigSource {
    pub fn new(bus: Arc<EventBus>) -> (Self, ConfigSlot) {
        let (slot, rx) = watch::channel(None);
        (Self { bus, slot }, rx)
    }

    /// Parse, validate and (on success) activate one config document.
    ///
    /// Returns whether the revision was accepted. Never fails the caller:
    /// a rejected revision only publishes `ConfigInvalid`.
    pub fn apply_document(&self, document: &str) -> bool {
        self.bus.publish(Event::ConfigLoaded);
        let config = match Config::from_yaml_str(document) {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "config document failed to parse");
                self.bus.publish(Event::ConfigInvalid {
                    reason: e.to_string(),
                });
                return false;
            }
        };
        if let Err(e) = config.validate() {
            error!(error = %e, "config revision rejected");
            self.bus.publish(Event::ConfigInvalid {
                reason: e.to_string(),
            });
            return false;
        }
        // templates must compile before the revision goes live
        if let Err(e) = haptic_renderer::Renderer::from_config(&config) {
            error!(error = %e, "config templates failed to compile");
            self.bus.publish(Event::ConfigInvalid {
                reason: e.to_string(),
            });
            return false;
        }
        info!(
            watched_resources = config.watched_resources.len(),
            tests = config.validation_tests.len(),
            "config revision activated"
        );
        self.slot.send_replace(Some(Arc::new(config)));
        self.bus.publish(Event::ConfigValidated);
        true
    }

    /// Watch the named HAProxyTemplateConfig; fall back to the ConfigMap of
    /// the same name when the CRD is not installed.
    pub async fn run(self, client: Client, name: String) -> Result<()> {
        let api: Api<HAProxyTemplateConfig> = Api::default_namespaced(client.clone());
        match api.get_opt(&name).await {
            Ok(_) => self.watch_crd(api, name).await,
            Err(e) => {
                warn!(error = %e, "HAProxyTemplateConfig unavailable, falling back to ConfigMap");
                self.watch_configmap(Api::default_namespaced(client), name)
                    .await
            }
        }
    }

    async fn watch_crd(self, api: Api<HAProxyTemplateConfig>, name: String) -> Result<()> {
        let field_selector = format!("metadata.name={name}");
        let stream = watcher(
            api,
            watcher::Config::default().fields(&field_selector),
        );
        futures::pin_mut!(stream);
        while let Some(event) = stream.next().await {
            match event {
                Ok(watcher::Event::Applied(obj)) => {
                    self.apply_document(&obj.spec.config);
                }
                Ok(watcher::Event::Restarted(objs)) => {
                    if let Some(obj) = objs.into_iter().find(|o| {
                        o.metadata.name.as_deref() == Some(name.as_str())
                    }) {
                        self.apply_document(&obj.spec.config);
                    }
                }
                Ok(watcher::Event::Deleted(_)) => {
                    warn!(%name, "config resource deleted; keeping last revision");
                }
                Err(e) => {
                    warn!(error = %e, "config watch error, backing off");
                }
            }
        }
        Err(OperatorError::WatchEnded(
            "config watch stream ended unexpectedly".to_string(),
        ))
    }

    async fn watch_configmap(self, api: Api<ConfigMap>, name: String) -> Result<()> {
        let field_selector = format!("metadata.name={name}");
        let stream = watcher(
            api,
            watcher::Config::default().fields(&field_selector),
        );
        futures::pin_mut!(stream);
        while let Some(event) = stream.next().await {
            match event {
                Ok(watcher::Event::Applied(cm)) => self.apply_configmap(&cm),
                Ok(watcher::Event::Restarted(cms)) => {
                    if let Some(cm) = cms.iter().find(|c| {
                        c.metadata.name.as_deref() == Some(name.as_str())
                    }) {
                        self.apply_configmap(cm);
                    }
                }
                Ok(watcher::Event::Deleted(_)) => {
                    warn!(%name, "config map deleted; keeping last revision");
                }
                Err(e) => {
                    warn!(error = %e, "config watch error, backing off");
                }
            }
        }
        Err(OperatorError::WatchEnded(
            "config watch stream ended unexpectedly".to_string(),
        ))
    }

    fn apply_configmap(&self, cm: &ConfigMap) {
        match cm.data.as_ref().and_then(|d| d.get(CONFIGMAP_KEY)) {
            Some(document) => {
                self.apply_document(document);
            }
            None => {
                error!(key = CONFIGMAP_KEY, "config map has no config document");
                self.bus.publish(Event::ConfigInvalid {
                    reason: format!("config map is missing the '{CONFIGMAP_KEY}' key"),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
templates:
  haproxyCfg: "global\n"
"#;

    #[tokio::test]
    async fn test_valid_document_activates_and_announces() {
        let bus = Arc::new(EventBus::new());
        bus.start();
        let mut rx = bus.subscribe(8);
        let (source, slot) = ConfigSource::new(Arc::clone(&bus));

        assert!(source.apply_document(VALID));
        assert!(slot.borrow().is_some());
        assert_eq!(rx.recv().await, Some(Event::ConfigLoaded));
        assert_eq!(rx.recv().await, Some(Event::ConfigValidated));
    }

    #[tokio::test]
    async fn test_invalid_document_keeps_previous_revision() {
        let bus = Arc::new(EventBus::new());
        bus.start();
        let (source, slot) = ConfigSource::new(Arc::clone(&bus));

        assert!(source.apply_document(VALID));
        let first = slot.borrow().clone();

        let mut rx = bus.subscribe(8);
        assert!(!source.apply_document("templates:\n  haproxyCfg: \"\"\n"));
        assert_eq!(rx.recv().await, Some(Event::ConfigLoaded));
        assert!(matches!(rx.recv().await, Some(Event::ConfigInvalid { .. })));
        // last-known-good stays active
        assert_eq!(
            slot.borrow().as_ref().map(|c| c.templates.haproxy_cfg.clone()),
            first.map(|c| c.templates.haproxy_cfg.clone())
        );
    }

    #[tokio::test]
    async fn test_template_compile_error_rejected() {
        let bus = Arc::new(EventBus::new());
        bus.start();
        let (source, slot) = ConfigSource::new(Arc::clone(&bus));
        assert!(!source.apply_document("templates:\n  haproxyCfg: \"{% if x %}broken\"\n"));
        assert!(slot.borrow().is_none());
    }
}
