//! Embedded validation test definitions
//!
//! A config revision may carry named tests: literal resource fixtures plus
//! assertions against the rendered output. The reserved test name `_global`
//! contributes fixtures to every other test.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use haptic_core::{Error, Result};

/// Reserved test whose fixtures merge into all others.
pub const GLOBAL_TEST_NAME: &str = "_global";

/// One embedded validation test.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationTest {
    #[serde(default)]
    pub description: String,

    /// resource type (plural) -> literal resources injected into its store
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fixtures: BTreeMap<String, Vec<Value>>,

    /// url -> response body, for templates that fetch during rendering
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub http_fixtures: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assertions: Vec<Assertion>,
}

impl ValidationTest {
    /// Merge `_global` fixtures under this test's own.
    ///
    /// The test wins per resource type and per URL.
    pub fn merged_with_global(&self, global: Option<&ValidationTest>) -> ValidationTest {
        let Some(global) = global else {
            return self.clone();
        };
        let mut merged = self.clone();
        for (resource_type, resources) in &global.fixtures {
            merged
                .fixtures
                .entry(resource_type.clone())
                .or_insert_with(|| resources.clone());
        }
        for (url, body) in &global.http_fixtures {
            merged
                .http_fixtures
                .entry(url.clone())
                .or_insert_with(|| body.clone());
        }
        merged
    }
}

/// One assertion against a rendered artifact or the render outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assertion {
    #[serde(flatten)]
    pub kind: AssertionKind,

    /// `haproxy.cfg`, `map:<name>`, `file:<name>`, `cert:<name>`,
    /// or `rendering_error`
    #[serde(default = "default_target")]
    pub target: String,

    #[serde(default)]
    pub description: String,
}

fn default_target() -> String {
    "haproxy.cfg".to_string()
}

impl Assertion {
    pub fn resolved_target(&self) -> Result<AssertionTarget> {
        AssertionTarget::parse(&self.target)
    }
}

/// Tagged assertion variants; no shared state beyond the result record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssertionKind {
    /// Write the bundle to disk and run `haproxy -c`
    HaproxyValid,
    /// Regex must match the target
    Contains { pattern: String },
    /// Regex must not match the target
    NotContains { pattern: String },
    /// Regex must match exactly `expected` times
    MatchCount { pattern: String, expected: usize },
    /// Exact string comparison
    Equals { expected: String },
    /// Patterns must appear in the target in the given order
    MatchOrder { patterns: Vec<String> },
    /// JSONPath evaluated against the rendering context
    Jsonpath {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected: Option<Value>,
    },
    /// Regex matched against the captured render error
    RenderingError { pattern: String },
}

impl AssertionKind {
    /// Stable name used in results output.
    pub fn name(&self) -> &'static str {
        match self {
            Self::HaproxyValid => "haproxy_valid",
            Self::Contains { .. } => "contains",
            Self::NotContains { .. } => "not_contains",
            Self::MatchCount { .. } => "match_count",
            Self::Equals { .. } => "equals",
            Self::MatchOrder { .. } => "match_order",
            Self::Jsonpath { .. } => "jsonpath",
            Self::RenderingError { .. } => "rendering_error",
        }
    }
}

/// Parsed assertion target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssertionTarget {
    MainConfig,
    Map(String),
    GeneralFile(String),
    Certificate(String),
    RenderingError,
}

impl AssertionTarget {
    pub fn parse(target: &str) -> Result<Self> {
        if target == "haproxy.cfg" {
            return Ok(Self::MainConfig);
        }
        if target == "rendering_error" {
            return Ok(Self::RenderingError);
        }
        if let Some(name) = target.strip_prefix("map:") {
            return Ok(Self::Map(name.to_string()));
        }
        if let Some(name) = target.strip_prefix("file:") {
            return Ok(Self::GeneralFile(name.to_string()));
        }
        if let Some(name) = target.strip_prefix("cert:") {
            return Ok(Self::Certificate(name.to_string()));
        }
        Err(Error::config(format!(
            "unknown assertion target '{target}' (expected haproxy.cfg, map:<name>, file:<name>, cert:<name> or rendering_error)"
        )))
    }
}
