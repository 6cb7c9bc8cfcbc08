//! Debounced reconciliation and the render-and-push executor
//!
//! Resource churn arrives in bursts (endpoint updates fan out per pod); the
//! reconciler folds a burst into one `ReconcileRequested` after a quiet
//! window. The executor renders the active revision against the live stores
//! and hands the bundle to the dataplane transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use haptic_core::{Event, EventBus};
use haptic_renderer::{RenderedBundle, Renderer};

use crate::config_source::ConfigSlot;
use crate::resources::ResourceStores;
use crate::Result;

/// Default quiet window before a burst of changes triggers one reconcile.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Transport boundary: pushes one rendered bundle to every HAProxy
/// instance. Pushes are transactional per instance; partial application is
/// the transport's responsibility to prevent.
#[async_trait]
pub trait DataplanePush: Send + Sync {
    async fn push(&self, bundle: &RenderedBundle) -> Result<()>;
}

/// Stand-in transport that only logs; used in validate mode and tests.
#[derive(Debug, Default)]
pub struct LoggingPush;

#[async_trait]
impl DataplanePush for LoggingPush {
    async fn push(&self, bundle: &RenderedBundle) -> Result<()> {
        info!(
            cfg_bytes = bundle.haproxy_cfg.len(),
            maps = bundle.files.map_files.len(),
            general = bundle.files.general_files.len(),
            certs = bundle.files.ssl_certificates.len(),
            crt_lists = bundle.files.crt_list_files.len(),
            "rendered bundle ready for dataplane push"
        );
        Ok(())
    }
}

/// Fold `ResourceChanged` bursts into single `ReconcileRequested` events.
///
/// Runs until the event channel closes or shutdown flips.
pub async fn run_reconciler(
    mut rx: mpsc::Receiver<Event>,
    bus: Arc<EventBus>,
    debounce: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
            event = rx.recv() => {
                let Some(event) = event else { return };
                if !matches!(event, Event::ResourceChanged { .. }) {
                    continue;
                }
                // quiet window: keep absorbing changes until none arrive
                loop {
                    match tokio::time::timeout(debounce, rx.recv()).await {
                        Ok(Some(Event::ResourceChanged { .. })) => continue,
                        Ok(Some(_)) => continue,
                        Ok(None) => return,
                        Err(_) => break,
                    }
                }
                debug!("change burst settled, requesting reconcile");
                bus.publish(Event::ReconcileRequested);
            }
        }
    }
}

/// Render and push on every `ReconcileRequested`.
///
/// Errors are logged and swallowed; the previous configuration stays live
/// on the HAProxy side (last-known-good).
pub async fn run_executor(
    mut rx: mpsc::Receiver<Event>,
    config_slot: ConfigSlot,
    stores: Arc<ResourceStores>,
    push: Arc<dyn DataplanePush>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
            event = rx.recv() => {
                let Some(event) = event else { return };
                if !matches!(event, Event::ReconcileRequested) {
                    continue;
                }
                reconcile_once(&config_slot, &stores, push.as_ref()).await;
            }
        }
    }
}

/// One render-and-push cycle against the active revision.
pub async fn reconcile_once(
    config_slot: &ConfigSlot,
    stores: &ResourceStores,
    push: &dyn DataplanePush,
) {
    let Some(config) = config_slot.borrow().clone() else {
        warn!("reconcile requested before any config revision is active");
        return;
    };
    let renderer = match Renderer::from_config(&config) {
        Ok(renderer) => renderer,
        Err(e) => {
            // the config source compiles templates before activating a
            // revision, so this indicates a bug rather than user error
            error!(error = %e, "active revision failed to compile");
            return;
        }
    };
    let bundle = match renderer.render_with_stores(&stores.store_set()) {
        Ok(bundle) => bundle,
        Err(e) => {
            error!(error = %e, "rendering failed; keeping last pushed configuration");
            return;
        }
    };
    if let Err(e) = push.push(&bundle).await {
        error!(error = %e, "dataplane push failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haptic_config::Config;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingPush(AtomicUsize);

    #[async_trait]
    impl DataplanePush for CountingPush {
        async fn push(&self, _bundle: &RenderedBundle) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config_slot(yaml: &str) -> (watch::Sender<Option<Arc<Config>>>, ConfigSlot) {
        let config = Arc::new(Config::from_yaml_str(yaml).unwrap());
        watch::channel(Some(config))
    }

    #[tokio::test]
    async fn test_reconcile_once_renders_and_pushes() {
        let (_tx, slot) = config_slot("templates:\n  haproxyCfg: \"global\\n\"\n");
        let stores = ResourceStores::for_config(&slot.borrow().clone().unwrap());
        let push = CountingPush(AtomicUsize::new(0));
        reconcile_once(&slot, &stores, &push).await;
        assert_eq!(push.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_render_failure_does_not_push() {
        let (_tx, slot) = config_slot("templates:\n  haproxyCfg: \"{{ fail('nope') }}\"\n");
        let stores = ResourceStores::for_config(&slot.borrow().clone().unwrap());
        let push = CountingPush(AtomicUsize::new(0));
        reconcile_once(&slot, &stores, &push).await;
        assert_eq!(push.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_folds_bursts() {
        let bus = Arc::new(EventBus::new());
        bus.start();
        let mut out = bus.subscribe(8);
        let (tx, rx) = mpsc::channel(32);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run_reconciler(
            rx,
            Arc::clone(&bus),
            Duration::from_millis(500),
            shutdown_rx,
        ));

        for _ in 0..5 {
            tx.send(Event::ResourceChanged {
                resource_type: "services".to_string(),
            })
            .await
            .unwrap();
        }
        // allow the quiet window to elapse
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(out.recv().await, Some(Event::ReconcileRequested));
        assert!(out.try_recv().is_err(), "burst must fold into one request");

        drop(tx);
        handle.await.unwrap();
    }
}
