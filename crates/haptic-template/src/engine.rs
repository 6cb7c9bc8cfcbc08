//! Pre-compiled template engine
//!
//! One [`TemplateEngine`] owns a flat namespace of compiled templates;
//! `{% include "name" %}` resolves peers by logical name. Rendering is safe
//! for concurrent use: compiled templates are immutable after construction
//! and the only mutable state (trace buffer, `compute_once` markers) sits
//! behind mutexes keyed by render id.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use minijinja::value::{Enumerator, Object, Value};
use minijinja::{Environment, ErrorKind};
use serde::{Deserialize, Serialize};

use haptic_config::PostProcessorSpec;
use haptic_core::{Error, Result};

use crate::compute_once::{self, RENDER_ID_VAR};
use crate::filters::{register_filters, FilterSet};
use crate::functions::{register_functions, ComputeOnceMarkers, FunctionSet};
use crate::path::PathResolver;
use crate::post_process::PostProcessorPipeline;

/// Supported template dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineType {
    Jinja2,
}

impl EngineType {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "jinja2" => Ok(Self::Jinja2),
            other => Err(Error::UnsupportedEngine(other.to_string())),
        }
    }
}

/// Pre-compiled template namespace with the controller's filter set.
pub struct TemplateEngine {
    env: Environment<'static>,
    template_names: Vec<String>,
    filters: FilterSet,
    functions: FunctionSet,
    post_processors: BTreeMap<String, PostProcessorPipeline>,
    resolver: PathResolver,
    markers: ComputeOnceMarkers,
    next_render_id: AtomicU64,
    tracing_enabled: AtomicBool,
    trace_depth: AtomicUsize,
    trace: Mutex<String>,
}

impl TemplateEngine {
    /// Compile every template into one flat namespace.
    ///
    /// `compute_once` blocks are rewritten before compilation; compile
    /// failures carry the template name and a capped source snippet.
    pub fn new(
        engine_type: EngineType,
        templates: BTreeMap<String, String>,
        filters: FilterSet,
        functions: FunctionSet,
        post_processors: BTreeMap<String, Vec<PostProcessorSpec>>,
        resolver: PathResolver,
    ) -> Result<Self> {
        let EngineType::Jinja2 = engine_type;

        let markers: ComputeOnceMarkers = Arc::new(Mutex::new(HashSet::new()));
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        register_filters(&mut env, &filters, &resolver);
        register_functions(&mut env, &functions, Arc::clone(&markers));

        let mut template_names = Vec::with_capacity(templates.len());
        for (name, source) in &templates {
            let processed = compute_once::preprocess(name, source)?;
            env.add_template_owned(name.clone(), processed)
                .map_err(|e| Error::compile(name.clone(), e.to_string(), source))?;
            template_names.push(name.clone());
        }

        let mut compiled_processors = BTreeMap::new();
        for (template, specs) in &post_processors {
            compiled_processors.insert(template.clone(), PostProcessorPipeline::compile(specs)?);
        }

        Ok(Self {
            env,
            template_names,
            filters,
            functions,
            post_processors: compiled_processors,
            resolver,
            markers,
            next_render_id: AtomicU64::new(1),
            tracing_enabled: AtomicBool::new(false),
            trace_depth: AtomicUsize::new(0),
            trace: Mutex::new(String::new()),
        })
    }

    /// Names of every compiled template.
    pub fn template_names(&self) -> &[String] {
        &self.template_names
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.template_names.iter().any(|n| n == name)
    }

    /// The filter set this engine was built with; cloned for worker engines.
    pub fn filter_set(&self) -> &FilterSet {
        &self.filters
    }

    pub fn function_set(&self) -> &FunctionSet {
        &self.functions
    }

    pub fn path_resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Render a template against the given context.
    ///
    /// Each call gets a fresh render id: `compute_once` markers are scoped to
    /// it, so concurrent and repeated renders are independent.
    pub fn render(&self, name: &str, context: Value) -> Result<String> {
        let render_id = self.next_render_id.fetch_add(1, Ordering::SeqCst);
        self.clear_markers(render_id);

        let template = self.env.get_template(name).map_err(|e| {
            if e.kind() == ErrorKind::TemplateNotFound {
                Error::TemplateNotFound {
                    name: name.to_string(),
                    available: self.template_names.clone(),
                }
            } else {
                Error::render(name.to_string(), render_error_message(&e))
            }
        })?;

        let scope = Value::from_object(RenderScope {
            base: context,
            render_id,
        });

        self.trace_enter(name);
        let started = Instant::now();
        let outcome = template.render(&scope);
        self.trace_exit(name, started.elapsed().as_millis());
        self.clear_markers(render_id);

        let rendered = outcome.map_err(|e| {
            if e.kind() == ErrorKind::TemplateNotFound {
                Error::TemplateNotFound {
                    name: e.detail().unwrap_or(name).to_string(),
                    available: self.template_names.clone(),
                }
            } else {
                Error::render(name.to_string(), render_error_message(&e))
            }
        })?;

        Ok(match self.post_processors.get(name) {
            Some(pipeline) => pipeline.apply(rendered),
            None => rendered,
        })
    }

    /// Render with a plain JSON context; convenience for tests and tooling.
    pub fn render_json(&self, name: &str, context: &serde_json::Value) -> Result<String> {
        self.render(name, Value::from_serialize(context))
    }

    /// Turn on render tracing; each render appends to the trace buffer.
    pub fn enable_tracing(&self) {
        self.tracing_enabled.store(true, Ordering::SeqCst);
    }

    pub fn tracing_enabled(&self) -> bool {
        self.tracing_enabled.load(Ordering::SeqCst)
    }

    /// Return the accumulated trace output and clear the buffer.
    pub fn take_trace_output(&self) -> String {
        std::mem::take(&mut *self.trace.lock().expect("trace lock poisoned"))
    }

    /// Append externally produced trace lines (worker engine propagation).
    pub fn append_trace(&self, output: &str) {
        if output.is_empty() {
            return;
        }
        let mut trace = self.trace.lock().expect("trace lock poisoned");
        trace.push_str(output);
    }

    fn clear_markers(&self, render_id: u64) {
        self.markers
            .lock()
            .expect("compute_once marker lock poisoned")
            .retain(|(id, _)| *id != render_id);
    }

    fn trace_enter(&self, name: &str) {
        if !self.tracing_enabled() {
            return;
        }
        let depth = self.trace_depth.fetch_add(1, Ordering::SeqCst);
        let mut trace = self.trace.lock().expect("trace lock poisoned");
        trace.push_str(&format!(
            "[{}] {}Rendering: {}\n",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            "  ".repeat(depth),
            name
        ));
    }

    fn trace_exit(&self, name: &str, elapsed_ms: u128) {
        if !self.tracing_enabled() {
            return;
        }
        let depth = self.trace_depth.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        let mut trace = self.trace.lock().expect("trace lock poisoned");
        trace.push_str(&format!(
            "[{}] {}Completed: {} ({} ms)\n",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            "  ".repeat(depth),
            name,
            elapsed_ms
        ));
    }
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine")
            .field("templates", &self.template_names)
            .finish_non_exhaustive()
    }
}

fn render_error_message(err: &minijinja::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = std::error::Error::source(cause);
    }
    message
}

/// Context wrapper injecting the render id under [`RENDER_ID_VAR`].
#[derive(Debug)]
struct RenderScope {
    base: Value,
    render_id: u64,
}

impl Object for RenderScope {
    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        if key.as_str() == Some(RENDER_ID_VAR) {
            return Some(Value::from(self.render_id));
        }
        match self.base.get_item(key) {
            Ok(value) if !value.is_undefined() => Some(value),
            _ => None,
        }
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        let mut keys: Vec<Value> = match self.base.try_iter() {
            Ok(iter) => iter.collect(),
            Err(_) => Vec::new(),
        };
        keys.push(Value::from(RENDER_ID_VAR));
        Enumerator::Values(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn resolver() -> PathResolver {
        PathResolver::new(
            PathBuf::from("/etc/haproxy/maps"),
            PathBuf::from("/etc/haproxy/ssl"),
            PathBuf::from("/etc/haproxy/crt-lists"),
            PathBuf::from("/etc/haproxy/general"),
        )
    }

    fn engine(templates: &[(&str, &str)]) -> TemplateEngine {
        TemplateEngine::new(
            EngineType::Jinja2,
            templates
                .iter()
                .map(|(n, s)| (n.to_string(), s.to_string()))
                .collect(),
            FilterSet::standard(),
            FunctionSet::standard(),
            BTreeMap::new(),
            resolver(),
        )
        .unwrap()
    }

    #[test]
    fn test_basic_render() {
        let engine = engine(&[("haproxy.cfg", "global\n  maxconn {{ maxconn }}\n")]);
        let out = engine
            .render_json("haproxy.cfg", &json!({"maxconn": 1000}))
            .unwrap();
        assert_eq!(out, "global\n  maxconn 1000\n");
    }

    #[test]
    fn test_include_by_logical_name() {
        let engine = engine(&[
            ("haproxy.cfg", "{% include \"defaults\" %}\nfrontend fe\n"),
            ("defaults", "defaults\n  mode http"),
        ]);
        let out = engine.render_json("haproxy.cfg", &json!({})).unwrap();
        assert!(out.contains("defaults\n  mode http"));
        assert!(out.contains("frontend fe"));
    }

    #[test]
    fn test_missing_template_lists_available() {
        let engine = engine(&[("haproxy.cfg", "x")]);
        let err = engine.render_json("nope", &json!({})).unwrap_err();
        match err {
            Error::TemplateNotFound { name, available } => {
                assert_eq!(name, "nope");
                assert_eq!(available, vec!["haproxy.cfg".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_compile_error_carries_snippet() {
        let result = TemplateEngine::new(
            EngineType::Jinja2,
            BTreeMap::from([("bad".to_string(), "{% if x %}unclosed".to_string())]),
            FilterSet::standard(),
            FunctionSet::standard(),
            BTreeMap::new(),
            resolver(),
        );
        match result.unwrap_err() {
            Error::TemplateCompile { template, snippet, .. } => {
                assert_eq!(template, "bad");
                assert!(snippet.contains("unclosed"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_fail_function_halts_render() {
        let engine = engine(&[("haproxy.cfg", "{{ fail(\"Service 'api' not found\") }}")]);
        let err = engine.render_json("haproxy.cfg", &json!({})).unwrap_err();
        match err {
            Error::TemplateRender { message, .. } => {
                assert!(message.contains("Service 'api' not found"), "got: {message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_compute_once_body_runs_once() {
        // three includes of the same guarded snippet increment once
        let engine = engine(&[
            (
                "haproxy.cfg",
                concat!(
                    "{%- set ns = namespace(value=0) %}\n",
                    "{% include \"inc\" %}{% include \"inc\" %}{% include \"inc\" %}",
                    "Result: {{ ns.value }}"
                ),
            ),
            (
                "inc",
                "{%- compute_once ns %}{% set ns.value = ns.value + 1 %}{%- endcompute_once %}",
            ),
        ]);
        let out = engine.render_json("haproxy.cfg", &json!({})).unwrap();
        assert!(out.contains("Result: 1"), "got: {out}");
    }

    #[test]
    fn test_compute_once_fresh_per_render() {
        let engine = engine(&[(
            "haproxy.cfg",
            concat!(
                "{%- set ns = namespace(value=0) %}",
                "{%- compute_once ns %}{% set ns.value = ns.value + 1 %}{%- endcompute_once %}",
                "{{ ns.value }}"
            ),
        )]);
        // both renders must execute the body; markers are per render id
        assert_eq!(engine.render_json("haproxy.cfg", &json!({})).unwrap(), "1");
        assert_eq!(engine.render_json("haproxy.cfg", &json!({})).unwrap(), "1");
    }

    #[test]
    fn test_compute_once_requires_declared_variable() {
        let engine = engine(&[(
            "haproxy.cfg",
            "{%- compute_once ghost %}x{%- endcompute_once %}",
        )]);
        let err = engine.render_json("haproxy.cfg", &json!({})).unwrap_err();
        match err {
            Error::TemplateRender { message, .. } => {
                assert!(message.contains("ghost"), "got: {message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_membership_on_computed_string() {
        // concatenation yields a fresh string; membership must compare values
        let engine = engine(&[(
            "haproxy.cfg",
            "{% if foo ~ \"\" in items %}yes{% else %}no{% endif %}",
        )]);
        let out = engine
            .render_json("haproxy.cfg", &json!({"foo": "foo", "items": ["foo", "bar"]}))
            .unwrap();
        assert_eq!(out, "yes");
    }

    #[test]
    fn test_trim_blocks_whitespace_policy() {
        let engine = engine(&[(
            "haproxy.cfg",
            "{% for s in servers %}\nserver {{ s }}\n{% endfor %}\n",
        )]);
        let out = engine
            .render_json("haproxy.cfg", &json!({"servers": ["a", "b"]}))
            .unwrap();
        assert_eq!(out, "server a\nserver b\n");
    }

    #[test]
    fn test_post_processor_applied() {
        let engine = TemplateEngine::new(
            EngineType::Jinja2,
            BTreeMap::from([(
                "haproxy.cfg".to_string(),
                "server a 10.0.0.1:80   \nserver b 10.0.0.2:80\n".to_string(),
            )]),
            FilterSet::standard(),
            FunctionSet::standard(),
            BTreeMap::from([(
                "haproxy.cfg".to_string(),
                vec![PostProcessorSpec::RegexReplace {
                    pattern: r"\s+$".to_string(),
                    replacement: String::new(),
                }],
            )]),
            resolver(),
        )
        .unwrap();
        let out = engine.render_json("haproxy.cfg", &json!({})).unwrap();
        assert_eq!(out, "server a 10.0.0.1:80\nserver b 10.0.0.2:80\n");
    }

    #[test]
    fn test_tracing_records_and_clears() {
        let engine = engine(&[("haproxy.cfg", "global\n")]);
        engine.enable_tracing();
        engine.render_json("haproxy.cfg", &json!({})).unwrap();
        let trace = engine.take_trace_output();
        assert!(trace.contains("Rendering: haproxy.cfg"));
        assert!(trace.contains("Completed: haproxy.cfg"));
        assert!(engine.take_trace_output().is_empty());
    }

    #[test]
    fn test_get_path_filter_uses_resolver() {
        let engine = engine(&[("haproxy.cfg", "{{ \"hosts.map\" | get_path(\"map\") }}")]);
        let out = engine.render_json("haproxy.cfg", &json!({})).unwrap();
        assert_eq!(out, "/etc/haproxy/maps/hosts.map");
    }

    #[test]
    fn test_concurrent_renders_share_engine() {
        let engine = Arc::new(engine(&[(
            "haproxy.cfg",
            concat!(
                "{%- set ns = namespace(value=0) %}",
                "{%- compute_once ns %}{% set ns.value = ns.value + 1 %}{%- endcompute_once %}",
                "{{ ns.value }}"
            ),
        )]));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    engine.render_json("haproxy.cfg", &serde_json::json!({})).unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), "1");
        }
    }

    #[test]
    fn test_engine_type_parse() {
        assert_eq!(EngineType::parse("jinja2").unwrap(), EngineType::Jinja2);
        assert!(matches!(
            EngineType::parse("handlebars").unwrap_err(),
            Error::UnsupportedEngine(_)
        ));
    }
}
