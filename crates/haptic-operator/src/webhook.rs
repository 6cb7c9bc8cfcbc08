//! HTTPS admission webhook
//!
//! Receives `AdmissionReview` requests, maps them onto a proposed change and
//! lets the dry-run validator decide. The TLS certificate comes from a
//! Secret named in the settings; admission API types are defined here since
//! k8s-openapi does not ship them.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use haptic_core::{OverlayOp, Resource};
use haptic_validation::{DryRunValidator, ProposedChange};

use crate::resources::ResourceStores;
use crate::{OperatorError, Result};

/// AdmissionReview envelope (admission.k8s.io/v1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<AdmissionRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<AdmissionResponse>,
}

fn default_api_version() -> String {
    "admission.k8s.io/v1".to_string()
}

fn default_kind() -> String {
    "AdmissionReview".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    pub uid: String,
    pub operation: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<GroupVersionResource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_object: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GroupVersionResource {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub resource: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AdmissionStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdmissionStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Shared webhook state.
pub struct WebhookState {
    pub validator: DryRunValidator,
    pub stores: Arc<ResourceStores>,
}

/// Router serving `POST /validate`.
pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/validate", post(handle_admission))
        .with_state(state)
}

async fn handle_admission(
    State(state): State<Arc<WebhookState>>,
    Json(review): Json<AdmissionReview>,
) -> Json<AdmissionReview> {
    let Some(request) = review.request else {
        return Json(AdmissionReview {
            api_version: default_api_version(),
            kind: default_kind(),
            request: None,
            response: Some(AdmissionResponse {
                uid: String::new(),
                allowed: false,
                status: Some(AdmissionStatus {
                    message: Some("AdmissionReview carried no request".to_string()),
                }),
            }),
        });
    };

    let response = review_request(&state, &request).await;
    Json(AdmissionReview {
        api_version: default_api_version(),
        kind: default_kind(),
        request: Some(request),
        response: Some(response),
    })
}

/// Decide one admission request.
pub async fn review_request(
    state: &WebhookState,
    request: &AdmissionRequest,
) -> AdmissionResponse {
    let change = match to_proposed_change(request) {
        Ok(Some(change)) => change,
        Ok(None) => {
            // operations we do not simulate (CONNECT etc.) pass through
            return AdmissionResponse {
                uid: request.uid.clone(),
                allowed: true,
                status: None,
            };
        }
        Err(message) => {
            warn!(%message, "malformed admission request");
            return AdmissionResponse {
                uid: request.uid.clone(),
                allowed: false,
                status: Some(AdmissionStatus {
                    message: Some(message),
                }),
            };
        }
    };

    debug!(
        resource_type = %change.resource_type,
        namespace = %change.namespace,
        name = %change.name,
        op = ?change.op,
        "running admission dry-run"
    );
    match state
        .validator
        .validate_change(state.stores.as_map(), &change)
        .await
    {
        Ok(admission) => AdmissionResponse {
            uid: request.uid.clone(),
            allowed: admission.allowed,
            status: admission.reason.map(|message| AdmissionStatus {
                message: Some(message),
            }),
        },
        Err(e) => {
            warn!(error = %e, "dry-run failed; rejecting change");
            AdmissionResponse {
                uid: request.uid.clone(),
                allowed: false,
                status: Some(AdmissionStatus {
                    message: Some(format!("dry-run validation failed: {e}")),
                }),
            }
        }
    }
}

fn to_proposed_change(request: &AdmissionRequest) -> std::result::Result<Option<ProposedChange>, String> {
    let op = match request.operation.as_str() {
        "CREATE" => OverlayOp::Create,
        "UPDATE" => OverlayOp::Update,
        "DELETE" => OverlayOp::Delete,
        _ => return Ok(None),
    };
    let resource_type = request
        .resource
        .as_ref()
        .map(|r| r.resource.clone())
        .filter(|r| !r.is_empty())
        .ok_or_else(|| "admission request carries no resource coordinates".to_string())?;

    let object = match (&op, &request.object) {
        (OverlayOp::Delete, _) => None,
        (_, Some(raw)) => Some(
            Resource::new(raw.clone())
                .map_err(|e| format!("admission object is not a valid resource: {e}"))?,
        ),
        (_, None) => return Err("create/update admission without an object".to_string()),
    };

    let namespace = if request.namespace.is_empty() {
        object
            .as_ref()
            .and_then(|o| o.namespace().map(str::to_string))
            .unwrap_or_default()
    } else {
        request.namespace.clone()
    };
    let name = if request.name.is_empty() {
        object
            .as_ref()
            .and_then(|o| o.name().map(str::to_string))
            .unwrap_or_default()
    } else {
        request.name.clone()
    };

    Ok(Some(ProposedChange {
        resource_type,
        namespace,
        name,
        op,
        object,
    }))
}

/// Build a rustls server config from PEM-encoded certificate and key.
pub fn build_tls_config(cert_pem: &[u8], key_pem: &[u8]) -> Result<rustls::ServerConfig> {
    // a process-wide provider must be pinned before the builder runs
    let _ = rustls::crypto::ring::default_provider().install_default();
    let certs: Vec<_> = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| OperatorError::Webhook(format!("failed to parse certificate: {e}")))?;
    if certs.is_empty() {
        return Err(OperatorError::Webhook(
            "no certificates found in webhook cert secret".to_string(),
        ));
    }
    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| OperatorError::Webhook(format!("failed to parse private key: {e}")))?
        .ok_or_else(|| OperatorError::Webhook("no private key found".to_string()))?;
    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| OperatorError::Webhook(format!("TLS config error: {e}")))
}

/// Load the webhook TLS config from the named Secret (`tls.crt`/`tls.key`).
pub async fn tls_config_from_secret(client: Client, name: &str) -> Result<rustls::ServerConfig> {
    let api: Api<Secret> = Api::default_namespaced(client);
    let secret = api.get(name).await?;
    let data = secret
        .data
        .ok_or_else(|| OperatorError::Webhook(format!("secret '{name}' has no data")))?;
    let cert = data
        .get("tls.crt")
        .ok_or_else(|| OperatorError::Webhook(format!("secret '{name}' is missing tls.crt")))?;
    let key = data
        .get("tls.key")
        .ok_or_else(|| OperatorError::Webhook(format!("secret '{name}' is missing tls.key")))?;
    build_tls_config(&cert.0, &key.0)
}

/// Serve the webhook until shutdown; TLS when a server config is given.
pub async fn serve(
    addr: SocketAddr,
    router: Router,
    tls: Option<rustls::ServerConfig>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, tls = tls.is_some(), "admission webhook listening");

    let Some(tls) = tls else {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await?;
        return Ok(());
    };

    let acceptor = TlsAcceptor::from(Arc::new(tls));
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Ok(());
                }
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let acceptor = acceptor.clone();
                let router = router.clone();
                tokio::spawn(async move {
                    let tls_stream = match acceptor.accept(stream).await {
                        Ok(tls_stream) => tls_stream,
                        Err(e) => {
                            debug!(%peer, error = %e, "TLS handshake failed");
                            return;
                        }
                    };
                    let service = hyper_util::service::TowerToHyperService::new(router);
                    if let Err(e) = hyper::server::conn::http1::Builder::new()
                        .serve_connection(hyper_util::rt::TokioIo::new(tls_stream), service)
                        .await
                    {
                        debug!(%peer, error = %e, "webhook connection error");
                    }
                });
            }
        }
    }
}
