//! Operator runtime settings with flag/env/default precedence
//!
//! The CLI layer maps flags over these; absent a flag, the environment wins
//! over the built-in default.

use std::path::PathBuf;

/// Environment variable names recognized by the controller.
pub const ENV_CRD_NAME: &str = "CRD_NAME";
pub const ENV_SECRET_NAME: &str = "SECRET_NAME";
pub const ENV_WEBHOOK_CERT_SECRET_NAME: &str = "WEBHOOK_CERT_SECRET_NAME";
pub const ENV_DEBUG_PORT: &str = "DEBUG_PORT";
pub const ENV_VERBOSE: &str = "VERBOSE";

/// Runtime settings for `haptic run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Name of the HAProxyTemplateConfig resource holding the config
    pub crd_name: String,
    /// Secret with dataplane credentials
    pub secret_name: String,
    /// Secret with the webhook TLS certificate
    pub webhook_cert_secret_name: String,
    /// Optional port for the debug endpoint
    pub debug_port: Option<u16>,
    /// 0 = warn, 1 = info, 2 = debug
    pub verbose: u8,
    /// Explicit kubeconfig path; in-cluster config when unset
    pub kubeconfig: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            crd_name: "haproxy-config".to_string(),
            secret_name: "haproxy-template-ic-credentials".to_string(),
            webhook_cert_secret_name: "haproxy-webhook-certs".to_string(),
            debug_port: None,
            verbose: 1,
            kubeconfig: None,
        }
    }
}

impl Settings {
    /// Defaults overridden by any environment variables that are set.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Ok(v) = std::env::var(ENV_CRD_NAME) {
            settings.crd_name = v;
        }
        if let Ok(v) = std::env::var(ENV_SECRET_NAME) {
            settings.secret_name = v;
        }
        if let Ok(v) = std::env::var(ENV_WEBHOOK_CERT_SECRET_NAME) {
            settings.webhook_cert_secret_name = v;
        }
        if let Ok(v) = std::env::var(ENV_DEBUG_PORT) {
            settings.debug_port = v.parse().ok();
        }
        if let Ok(v) = std::env::var(ENV_VERBOSE) {
            settings.verbose = v.parse().unwrap_or(settings.verbose);
        }
        settings
    }

    /// Tracing filter directive for the configured verbosity.
    pub fn log_filter(&self) -> String {
        let level = match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        };
        format!("haptic={level},kube=info")
    }
}
