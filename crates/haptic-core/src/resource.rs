//! Opaque Kubernetes resource model
//!
//! Watched objects arrive as arbitrary JSON; the controller never deserializes
//! them into typed structs. Templates receive them verbatim, stores index them
//! by dotted field paths.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// One Kubernetes object as delivered by the watch layer.
///
/// Always a JSON object; the well-known fields (`metadata.namespace`,
/// `metadata.name`, `apiVersion`, `kind`) get dedicated accessors, everything
/// else is reached through [`Resource::get_path`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resource(Value);

impl Resource {
    /// Wrap a JSON value; only objects are valid resources
    pub fn new(value: Value) -> Result<Self> {
        if value.is_object() {
            Ok(Self(value))
        } else {
            Err(Error::config("resource must be a JSON object"))
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.get_path("metadata.namespace").and_then(Value::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.get_path("metadata.name").and_then(Value::as_str)
    }

    pub fn api_version(&self) -> Option<&str> {
        self.get_path("apiVersion").and_then(Value::as_str)
    }

    pub fn kind(&self) -> Option<&str> {
        self.get_path("kind").and_then(Value::as_str)
    }

    /// Look up a dotted field path, traversing nested objects only.
    ///
    /// Returns `None` when a segment is missing or a non-object is hit
    /// before the final segment.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut current = &self.0;
        for segment in path.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

/// Configuration record describing one watched resource type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchedResourceSpec {
    /// API group/version, e.g. `networking.k8s.io/v1`
    pub api_version: String,

    /// Plural resource type, e.g. `ingresses`
    pub resource_type: String,

    /// Ordered dotted field paths forming the index key
    pub index_by: Vec<String>,

    /// Dotted paths blanked before content hashing (typically `status`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore_fields: Vec<String>,
}
