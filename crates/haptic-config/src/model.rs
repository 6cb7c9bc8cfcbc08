//! The config revision: watched resources, templates, tests, dataplane layout

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use haptic_core::{Error, Result, WatchedResourceSpec};

use crate::test_definitions::{ValidationTest, GLOBAL_TEST_NAME};

/// One immutable revision of the user configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// resource type (plural) -> watch/index spec
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub watched_resources: BTreeMap<String, WatchedResourceSpec>,

    #[serde(default)]
    pub templates: TemplateSources,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub validation_tests: BTreeMap<String, ValidationTest>,

    #[serde(default)]
    pub dataplane: DataplaneConfig,

    /// template name -> ordered post-processor pipeline
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub post_processors: BTreeMap<String, Vec<PostProcessorSpec>>,

    /// Merged into the top level of every rendering context
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra_context: serde_json::Map<String, Value>,
}

/// Template sources keyed by logical name; all share one flat include
/// namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSources {
    /// The main configuration template
    #[serde(default)]
    pub haproxy_cfg: String,

    /// Cross-cutting fragments aggregated by priority
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub snippets: BTreeMap<String, Snippet>,

    /// Pre-declared map file templates, keyed by logical path
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub maps: BTreeMap<String, String>,

    /// Pre-declared general file templates
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub files: BTreeMap<String, String>,

    /// Pre-declared SSL certificate templates
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ssl_certs: BTreeMap<String, String>,
}

impl TemplateSources {
    /// Collapse every template source into the flat namespace the engine
    /// compiles; `{% include %}` resolves across categories by logical name.
    ///
    /// Logical names must be unique across categories.
    pub fn flat_namespace(&self) -> Result<BTreeMap<String, String>> {
        let mut namespace = BTreeMap::new();
        let mut insert = |name: &str, source: &str| -> Result<()> {
            if namespace
                .insert(name.to_string(), source.to_string())
                .is_some()
            {
                return Err(Error::config(format!(
                    "duplicate template name '{name}' across template categories"
                )));
            }
            Ok(())
        };
        insert("haproxy.cfg", &self.haproxy_cfg)?;
        for (name, snippet) in &self.snippets {
            insert(name, snippet.template())?;
        }
        for (name, source) in &self.maps {
            insert(name, source)?;
        }
        for (name, source) in &self.files {
            insert(name, source)?;
        }
        for (name, source) in &self.ssl_certs {
            insert(name, source)?;
        }
        Ok(namespace)
    }

    /// Snippet names ordered by `(priority ascending, name ascending)`.
    pub fn ordered_snippet_names(&self) -> Vec<String> {
        let mut names: Vec<(&String, u32)> = self
            .snippets
            .iter()
            .map(|(name, snippet)| (name, snippet.priority()))
            .collect();
        names.sort_by(|(a_name, a_priority), (b_name, b_priority)| {
            a_priority.cmp(b_priority).then_with(|| a_name.cmp(b_name))
        });
        names.into_iter().map(|(name, _)| name.clone()).collect()
    }
}

/// Default snippet priority when unspecified.
pub const DEFAULT_SNIPPET_PRIORITY: u32 = 500;

/// A snippet is either a bare template string or a template with an explicit
/// aggregation priority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Snippet {
    Inline(String),
    Prioritized {
        template: String,
        #[serde(default = "default_priority")]
        priority: u32,
    },
}

fn default_priority() -> u32 {
    DEFAULT_SNIPPET_PRIORITY
}

impl Snippet {
    pub fn template(&self) -> &str {
        match self {
            Self::Inline(template) => template,
            Self::Prioritized { template, .. } => template,
        }
    }

    pub fn priority(&self) -> u32 {
        match self {
            Self::Inline(_) => DEFAULT_SNIPPET_PRIORITY,
            Self::Prioritized { priority, .. } => *priority,
        }
    }
}

/// Dataplane storage directories plus capability flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataplaneConfig {
    #[serde(default = "default_maps_dir")]
    pub maps_dir: PathBuf,
    #[serde(default = "default_ssl_dir")]
    pub ssl_dir: PathBuf,
    #[serde(default = "default_crt_list_dir")]
    pub crt_list_dir: PathBuf,
    #[serde(default = "default_general_dir")]
    pub general_dir: PathBuf,
    /// False on HAProxy versions without native CRT-list storage; CRT-lists
    /// then land in the general directory
    #[serde(default = "default_true")]
    pub supports_crt_list_storage: bool,
    /// Label selector matching the HAProxy pods this controller feeds
    #[serde(default = "default_pod_selector")]
    pub pod_selector: String,
}

fn default_maps_dir() -> PathBuf {
    PathBuf::from("/etc/haproxy/maps")
}
fn default_ssl_dir() -> PathBuf {
    PathBuf::from("/etc/haproxy/ssl")
}
fn default_crt_list_dir() -> PathBuf {
    PathBuf::from("/etc/haproxy/crt-lists")
}
fn default_general_dir() -> PathBuf {
    PathBuf::from("/etc/haproxy/general")
}
fn default_true() -> bool {
    true
}
fn default_pod_selector() -> String {
    "app=haproxy".to_string()
}

impl Default for DataplaneConfig {
    fn default() -> Self {
        Self {
            maps_dir: default_maps_dir(),
            ssl_dir: default_ssl_dir(),
            crt_list_dir: default_crt_list_dir(),
            general_dir: default_general_dir(),
            supports_crt_list_storage: true,
            pod_selector: default_pod_selector(),
        }
    }
}

/// One post-processing transformation applied to a rendered template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PostProcessorSpec {
    /// Apply `pattern` -> `replacement` line by line
    RegexReplace { pattern: String, replacement: String },
}

impl Config {
    /// Parse a revision from YAML.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Parse a revision from a YAML file on disk.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    /// Validate the revision; errors are [`Error::ConfigInvalid`].
    pub fn validate(&self) -> Result<()> {
        if self.templates.haproxy_cfg.trim().is_empty() {
            return Err(Error::config("templates.haproxyCfg must not be empty"));
        }
        for (resource_type, spec) in &self.watched_resources {
            if spec.index_by.is_empty() {
                return Err(Error::config(format!(
                    "watched resource '{resource_type}' has an empty indexBy list"
                )));
            }
            if spec.resource_type != *resource_type {
                return Err(Error::config(format!(
                    "watched resource key '{resource_type}' does not match its resourceType '{}'",
                    spec.resource_type
                )));
            }
        }
        for (name, test) in &self.validation_tests {
            if name == GLOBAL_TEST_NAME {
                if !test.assertions.is_empty() {
                    return Err(Error::config(
                        "the _global test provides fixtures only and must not carry assertions",
                    ));
                }
                continue;
            }
            for assertion in &test.assertions {
                assertion.resolved_target()?;
            }
        }
        for (template, pipeline) in &self.post_processors {
            for processor in pipeline {
                let PostProcessorSpec::RegexReplace { pattern, .. } = processor;
                regex::Regex::new(pattern).map_err(|e| {
                    Error::config(format!(
                        "post-processor for '{template}' has an invalid pattern: {e}"
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// The `_global` test, if configured.
    pub fn global_test(&self) -> Option<&ValidationTest> {
        self.validation_tests.get(GLOBAL_TEST_NAME)
    }

    /// All runnable tests (everything except `_global`), fixtures merged.
    pub fn runnable_tests(&self) -> BTreeMap<String, ValidationTest> {
        let global = self.global_test();
        self.validation_tests
            .iter()
            .filter(|(name, _)| name.as_str() != GLOBAL_TEST_NAME)
            .map(|(name, test)| (name.clone(), test.merged_with_global(global)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
watchedResources:
  services:
    apiVersion: v1
    resourceType: services
    indexBy: ["metadata.namespace", "metadata.name"]
    ignoreFields: ["status"]
templates:
  haproxyCfg: |
    global
      maxconn 1000
  snippets:
    backend-defaults:
      template: "  balance roundrobin"
      priority: 100
  maps:
    hosts.map: |
      {%- for svc in resources.services.list() %}
      {{ svc.metadata.name }} {{ svc.spec.clusterIP }}
      {%- endfor %}
validationTests:
  basic:
    description: renders at all
    assertions:
      - type: contains
        pattern: "maxconn 1000"
"#;

    #[test]
    fn test_parse_minimal_config() {
        let config = Config::from_yaml_str(MINIMAL).unwrap();
        assert!(config.watched_resources.contains_key("services"));
        assert_eq!(
            config.templates.snippets["backend-defaults"].priority(),
            100
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_snippet_inline_defaults_priority() {
        let yaml = r#"
templates:
  haproxyCfg: "global"
  snippets:
    plain: "  option redispatch"
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(
            config.templates.snippets["plain"].priority(),
            DEFAULT_SNIPPET_PRIORITY
        );
        assert_eq!(
            config.templates.snippets["plain"].template(),
            "  option redispatch"
        );
    }

    #[test]
    fn test_empty_main_template_rejected() {
        let config = Config::from_yaml_str("templates:\n  haproxyCfg: \"\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_index_by_rejected() {
        let yaml = r#"
watchedResources:
  services:
    apiVersion: v1
    resourceType: services
    indexBy: []
templates:
  haproxyCfg: "global"
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_global_test_with_assertions_rejected() {
        let yaml = r#"
templates:
  haproxyCfg: "global"
validationTests:
  _global:
    assertions:
      - type: haproxy_valid
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_runnable_tests_exclude_global() {
        let yaml = r#"
templates:
  haproxyCfg: "global"
validationTests:
  _global:
    fixtures:
      services:
        - metadata: {name: shared}
  only:
    description: one test
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        let runnable = config.runnable_tests();
        assert_eq!(runnable.len(), 1);
        assert!(runnable["only"].fixtures.contains_key("services"));
    }

    #[test]
    fn test_bad_post_processor_pattern_rejected() {
        let yaml = r#"
templates:
  haproxyCfg: "global"
postProcessors:
  haproxy.cfg:
    - type: regex_replace
      pattern: "([unclosed"
      replacement: ""
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_flat_namespace_collects_all_categories() {
        let config = Config::from_yaml_str(MINIMAL).unwrap();
        let namespace = config.templates.flat_namespace().unwrap();
        assert!(namespace.contains_key("haproxy.cfg"));
        assert!(namespace.contains_key("backend-defaults"));
        assert!(namespace.contains_key("hosts.map"));
    }

    #[test]
    fn test_flat_namespace_rejects_duplicates() {
        let yaml = r#"
templates:
  haproxyCfg: "global"
  snippets:
    hosts.map: "snippet"
  maps:
    hosts.map: "map"
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert!(config.templates.flat_namespace().is_err());
    }

    #[test]
    fn test_snippet_ordering_priority_then_name() {
        let yaml = r#"
templates:
  haproxyCfg: "global"
  snippets:
    zeta: "z"
    alpha: "a"
    first:
      template: "f"
      priority: 10
    last:
      template: "l"
      priority: 900
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(
            config.templates.ordered_snippet_names(),
            vec!["first", "alpha", "zeta", "last"]
        );
    }

    #[test]
    fn test_dataplane_defaults() {
        let config = Config::default();
        assert!(config.dataplane.supports_crt_list_storage);
        assert_eq!(
            config.dataplane.maps_dir,
            PathBuf::from("/etc/haproxy/maps")
        );
    }
}
