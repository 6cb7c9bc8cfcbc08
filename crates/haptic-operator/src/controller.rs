//! Five-stage controller startup and supervised shutdown
//!
//! 1. Boot the config source and start the event bus (replays buffered
//!    events to subscribers wired in any order).
//! 2. Block until a config revision validates; announce `ControllerStarted`.
//! 3. Spawn one watcher per watched resource type plus the synchronization
//!    tracker.
//! 4. Block until every watched type finished its initial sync.
//! 5. Spawn the debounced reconciler, the executor and the webhook.
//!
//! SIGTERM/SIGINT flips the shutdown signal; the first component error does
//! the same. Shutdown that overruns its deadline force-exits nonzero.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use haptic_config::Settings;
use haptic_core::{Event, EventBus};
use haptic_validation::{DryRunValidator, HaproxyCheck};

use crate::config_source::ConfigSource;
use crate::credentials::DataplaneCredentials;
use crate::reconcile::{self, DataplanePush, LoggingPush, DEFAULT_DEBOUNCE};
use crate::resources::{self, ResourceStores};
use crate::tracker::IndexSynchronizationTracker;
use crate::webhook::{self, WebhookState};
use crate::{OperatorError, Result};

/// How long a startup stage may block before the diagnostic fires.
const STAGE_TIMEOUT: Duration = Duration::from_secs(300);

/// Grace period for components to wind down after shutdown is signalled.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// Port the admission webhook binds.
const WEBHOOK_PORT: u16 = 8443;

/// The controller daemon.
pub struct Controller {
    client: Client,
    settings: Settings,
    push: Arc<dyn DataplanePush>,
}

impl Controller {
    pub fn new(client: Client, settings: Settings) -> Self {
        Self {
            client,
            settings,
            push: Arc::new(LoggingPush),
        }
    }

    /// Swap in the real dataplane transport.
    pub fn with_push(mut self, push: Arc<dyn DataplanePush>) -> Self {
        self.push = push;
        self
    }

    /// Run until shutdown; Ok on graceful exit.
    pub async fn run(self) -> Result<()> {
        let bus = Arc::new(EventBus::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        spawn_signal_handler(Arc::clone(&bus), shutdown_tx.clone());

        let mut components: JoinSet<Result<()>> = JoinSet::new();

        // stage 1: configuration management, then go live
        info!("stage 1: booting configuration source");
        // resource churn floods this queue between stages; size it so the
        // one event each stage waits for cannot be the one dropped
        let mut stage_events = bus.subscribe(4096);
        let (config_source, config_slot) = ConfigSource::new(Arc::clone(&bus));
        {
            let client = self.client.clone();
            let crd_name = self.settings.crd_name.clone();
            components.spawn(async move { config_source.run(client, crd_name).await });
        }
        bus.start();

        // stage 2: wait for a valid revision
        info!("stage 2: waiting for a valid configuration revision");
        wait_for_event(
            &mut stage_events,
            |e| matches!(e, Event::ConfigValidated),
            "no valid configuration appeared; check the HAProxyTemplateConfig resource and controller logs (--verbose for detail)",
        )
        .await?;
        bus.publish(Event::ControllerStarted);
        let config = config_slot
            .borrow()
            .clone()
            .ok_or_else(|| OperatorError::StageTimeout("validated config vanished".to_string()))?;

        match DataplaneCredentials::load(self.client.clone(), &self.settings.secret_name).await {
            Ok(_) => info!("dataplane credentials loaded"),
            Err(e) => warn!(error = %e, "dataplane credentials unavailable; transport will retry"),
        }

        // stage 3: resource watchers and the sync tracker
        info!(
            watched = config.watched_resources.len(),
            "stage 3: starting resource watchers"
        );
        let stores = Arc::new(ResourceStores::for_config(&config));
        for (resource_type, spec) in &config.watched_resources {
            let store = stores
                .get(resource_type)
                .expect("store exists for every watched type");
            let client = self.client.clone();
            let bus = Arc::clone(&bus);
            let spec = spec.clone();
            let shutdown = shutdown_rx.clone();
            components.spawn(async move {
                resources::watch_resource(client, spec, store, bus, shutdown).await
            });
        }
        {
            let store = stores
                .get(haptic_renderer::HAPROXY_PODS_STORE)
                .expect("pod store always exists");
            let client = self.client.clone();
            let bus = Arc::clone(&bus);
            let selector = config.dataplane.pod_selector.clone();
            let shutdown = shutdown_rx.clone();
            components.spawn(async move {
                resources::watch_haproxy_pods(client, selector, store, bus, shutdown).await
            });
        }
        {
            let expected = config
                .watched_resources
                .keys()
                .cloned()
                .chain([haptic_renderer::HAPROXY_PODS_STORE.to_string()]);
            let tracker = IndexSynchronizationTracker::new(expected);
            let tracker_rx = bus.subscribe(4096);
            let bus = Arc::clone(&bus);
            components.spawn(async move {
                tracker.run(tracker_rx, bus).await;
                Ok(())
            });
        }

        // stage 4: wait for every initial sync
        info!("stage 4: waiting for index synchronization");
        wait_for_event(
            &mut stage_events,
            |e| matches!(e, Event::IndexSynchronized),
            "resource indexes never synchronized; verify RBAC allows listing the watched resources",
        )
        .await?;

        // stage 5: reconciler, executor, webhook
        info!("stage 5: starting reconciler and webhook");
        {
            let rx = bus.subscribe(1024);
            let bus = Arc::clone(&bus);
            let shutdown = shutdown_rx.clone();
            components.spawn(async move {
                reconcile::run_reconciler(rx, bus, DEFAULT_DEBOUNCE, shutdown).await;
                Ok(())
            });
        }
        {
            let rx = bus.subscribe(1024);
            let slot = config_slot.clone();
            let stores = Arc::clone(&stores);
            let push = Arc::clone(&self.push);
            let shutdown = shutdown_rx.clone();
            components.spawn(async move {
                reconcile::run_executor(rx, slot, stores, push, shutdown).await;
                Ok(())
            });
        }
        {
            let state = Arc::new(WebhookState {
                validator: DryRunValidator::new(Arc::clone(&config), HaproxyCheck::default()),
                stores: Arc::clone(&stores),
            });
            let tls = match webhook::tls_config_from_secret(
                self.client.clone(),
                &self.settings.webhook_cert_secret_name,
            )
            .await
            {
                Ok(tls) => Some(tls),
                Err(e) => {
                    warn!(error = %e, "webhook TLS unavailable, serving plaintext");
                    None
                }
            };
            let addr = SocketAddr::from(([0, 0, 0, 0], WEBHOOK_PORT));
            let router = webhook::router(state);
            let shutdown = shutdown_rx.clone();
            components.spawn(async move { webhook::serve(addr, router, tls, shutdown).await });
        }

        // render once now that indexes are warm
        bus.publish(Event::ReconcileRequested);

        info!("controller running");
        let outcome = supervise(&mut components, &shutdown_tx, shutdown_rx).await;
        drain_with_deadline(components).await;
        outcome
    }
}

/// Await components; the first error (or a shutdown signal) stops the rest.
async fn supervise(
    components: &mut JoinSet<Result<()>>,
    shutdown_tx: &watch::Sender<bool>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("shutdown requested");
                    return Ok(());
                }
            }
            joined = components.join_next() => {
                match joined {
                    None => return Ok(()),
                    Some(Ok(Ok(()))) => continue,
                    Some(Ok(Err(e))) => {
                        error!(error = %e, "component failed, shutting down");
                        let _ = shutdown_tx.send(true);
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "component panicked, shutting down");
                        let _ = shutdown_tx.send(true);
                        return Err(OperatorError::Supervision(format!(
                            "component panicked: {e}"
                        )));
                    }
                }
            }
        }
    }
}

/// Give the remaining components the shutdown deadline, then force-exit.
async fn drain_with_deadline(mut components: JoinSet<Result<()>>) {
    let drain = async {
        while let Some(joined) = components.join_next().await {
            if let Ok(Err(e)) = joined {
                warn!(error = %e, "component error during shutdown");
            }
        }
    };
    if tokio::time::timeout(SHUTDOWN_DEADLINE, drain).await.is_err() {
        error!(
            deadline_secs = SHUTDOWN_DEADLINE.as_secs(),
            "shutdown deadline exceeded, forcing exit"
        );
        std::process::exit(1);
    }
}

fn spawn_signal_handler(bus: Arc<EventBus>, shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    error!(error = %e, "failed to install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("termination signal received");
        bus.publish(Event::ShutdownRequested);
        let _ = shutdown_tx.send(true);
    });
}

/// Wait on the stage subscriber for a matching event, with an actionable
/// timeout diagnostic.
async fn wait_for_event(
    rx: &mut mpsc::Receiver<Event>,
    matches: impl Fn(&Event) -> bool,
    timeout_diagnostic: &str,
) -> Result<()> {
    let wait = async {
        while let Some(event) = rx.recv().await {
            if matches(&event) {
                return Ok(());
            }
            if let Event::ConfigInvalid { reason } = &event {
                warn!(%reason, "configuration rejected while waiting");
            }
        }
        Err(OperatorError::StageTimeout(
            "event bus closed during startup".to_string(),
        ))
    };
    match tokio::time::timeout(STAGE_TIMEOUT, wait).await {
        Ok(result) => result,
        Err(_) => Err(OperatorError::StageTimeout(timeout_diagnostic.to_string())),
    }
}
