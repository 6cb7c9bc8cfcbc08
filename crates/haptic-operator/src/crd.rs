//! The HAProxyTemplateConfig custom resource

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// HAProxyTemplateConfig carries one full config revision: watched
/// resources, templates, validation tests, dataplane layout.
///
/// The `config` field holds the YAML config document verbatim; keeping it
/// opaque here means the CRD schema never lags the config model.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "haptic.io",
    version = "v1",
    kind = "HAProxyTemplateConfig",
    plural = "haproxytemplateconfigs",
    shortname = "htc",
    namespaced,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct HAProxyTemplateConfigSpec {
    /// The full configuration document, YAML
    pub config: String,
}
