//! Kubernetes operator runtime for HAPTIC
//!
//! Wires the core subsystems to a cluster: a config source (CRD with a
//! legacy ConfigMap fallback), one watcher per watched resource type, the
//! five-stage startup sequenced over the event bus, the debounced
//! reconcile-and-push loop, and the HTTPS admission webhook backed by the
//! dry-run validator.

pub mod config_source;
pub mod controller;
pub mod crd;
pub mod credentials;
pub mod reconcile;
pub mod resources;
pub mod tracker;
pub mod webhook;

pub use controller::Controller;
pub use crd::{HAProxyTemplateConfig, HAProxyTemplateConfigSpec};

/// Result type alias for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

/// Operator-level errors
#[derive(Debug, thiserror::Error)]
pub enum OperatorError {
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Core(#[from] haptic_core::Error),

    #[error("startup stage timed out: {0}")]
    StageTimeout(String),

    #[error("watch stream ended: {0}")]
    WatchEnded(String),

    #[error("component supervision failed: {0}")]
    Supervision(String),

    #[error("webhook error: {0}")]
    Webhook(String),

    #[error("credentials error: {0}")]
    Credentials(String),

    #[error("dataplane push error: {0}")]
    Push(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
