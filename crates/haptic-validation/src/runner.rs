//! Parallel execution of embedded validation tests
//!
//! Tests run on a worker pool; every test gets a fresh temp directory and a
//! fresh template engine. HAProxy syntax validation writes real files, so
//! concurrent tests must never share paths, and the engine's filter set is
//! cloned per worker rather than shared.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use haptic_config::{Config, ValidationTest};
use haptic_core::{Error, Indexer, Resource, Result, Store, StoreRead};
use haptic_renderer::{Renderer, StoreSet, HAPROXY_PODS_STORE};
use haptic_template::{EngineType, PathResolver, TemplateEngine};

use crate::assertions::{run_assertion, AssertionInputs};
use crate::haproxy::{write_bundle, HaproxyCheck};
use crate::results::{TestReport, TestResults};

struct TestEntry {
    name: String,
    definition: ValidationTest,
}

/// Runs a config revision's embedded tests.
pub struct TestRunner {
    config: Arc<Config>,
    parent_engine: Arc<TemplateEngine>,
    haproxy: HaproxyCheck,
    workers: usize,
    dump_dir: Option<PathBuf>,
}

impl TestRunner {
    /// Validate the config and pre-compile its templates once; compile
    /// errors surface here instead of inside every worker.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let renderer = Renderer::from_config(&config)?;
        Ok(Self {
            config: Arc::new(config),
            parent_engine: Arc::clone(renderer.engine()),
            haproxy: HaproxyCheck::default(),
            workers: num_cpus::get(),
            dump_dir: None,
        })
    }

    /// Worker count; `1` forces sequential execution, `0` resets to the
    /// CPU count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = if workers == 0 { num_cpus::get() } else { workers };
        self
    }

    pub fn with_haproxy(mut self, haproxy: HaproxyCheck) -> Self {
        self.haproxy = haproxy;
        self
    }

    /// Dump every rendered bundle under `dir/<test-name>/`.
    pub fn with_dump_dir(mut self, dir: PathBuf) -> Self {
        self.dump_dir = Some(dir);
        self
    }

    /// Turn on template tracing; worker engines inherit it and their traces
    /// are appended to this runner's buffer after each test.
    pub fn enable_tracing(&self) {
        self.parent_engine.enable_tracing();
    }

    pub fn take_trace_output(&self) -> String {
        self.parent_engine.take_trace_output()
    }

    /// The custom filter names available to templates (`--debug-filters`).
    pub fn filter_names(&self) -> Vec<String> {
        self.parent_engine.filter_set().names()
    }

    /// Run all tests, or just the one named by `filter`.
    pub async fn run_tests(&self, filter: Option<&str>) -> Result<TestResults> {
        let mut tests = self.config.runnable_tests();
        if let Some(name) = filter {
            let Some(definition) = tests.remove(name) else {
                let available: Vec<String> = tests.keys().cloned().collect();
                return Err(Error::config(format!(
                    "test '{name}' not found (available: {})",
                    available.join(", ")
                )));
            };
            tests = BTreeMap::from([(name.to_string(), definition)]);
        }
        if tests.is_empty() {
            return Ok(TestResults::from_reports(Vec::new()));
        }

        let base_dir = tempfile::tempdir()?;
        let workers = self.workers.max(1).min(tests.len());
        debug!(tests = tests.len(), workers, "starting test run");

        let (tx, rx) = mpsc::channel::<TestEntry>(tests.len());
        for (name, definition) in tests {
            tx.send(TestEntry { name, definition })
                .await
                .map_err(|_| Error::config("test queue closed unexpectedly"))?;
        }
        drop(tx);

        let rx = Arc::new(Mutex::new(rx));
        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let rx = Arc::clone(&rx);
            let config = Arc::clone(&self.config);
            let parent = Arc::clone(&self.parent_engine);
            let haproxy = self.haproxy.clone();
            let base = base_dir.path().to_path_buf();
            let dump_dir = self.dump_dir.clone();
            handles.push(tokio::spawn(async move {
                let mut reports = Vec::new();
                let mut seq = 0usize;
                loop {
                    let entry = { rx.lock().await.recv().await };
                    let Some(entry) = entry else { break };
                    let test_dir = base.join(format!("worker-{worker_id}/test-{seq}"));
                    seq += 1;
                    let report = run_single_test(
                        &config,
                        &parent,
                        &haproxy,
                        &test_dir,
                        dump_dir.as_deref(),
                        entry,
                    )
                    .await;
                    // temp layout is per-test; release it as soon as the
                    // test is done, not at end of run
                    let _ = std::fs::remove_dir_all(&test_dir);
                    reports.push(report);
                }
                reports
            }));
        }

        let mut reports = Vec::new();
        for handle in handles {
            let worker_reports = handle
                .await
                .map_err(|e| Error::config(format!("test worker panicked: {e}")))?;
            reports.extend(worker_reports);
        }
        Ok(TestResults::from_reports(reports))
    }
}

async fn run_single_test(
    config: &Config,
    parent: &TemplateEngine,
    haproxy: &HaproxyCheck,
    test_dir: &Path,
    dump_dir: Option<&Path>,
    entry: TestEntry,
) -> TestReport {
    let TestEntry { name, definition } = entry;

    let report = match execute_test(config, parent, haproxy, test_dir, &name, &definition).await {
        Ok(report) => report,
        Err(e) => TestReport {
            name: name.clone(),
            description: definition.description.clone(),
            passed: false,
            render_error: Some(e.to_string()),
            assertions: Vec::new(),
        },
    };

    if let Some(dump_dir) = dump_dir {
        if let Err(e) = dump_rendered(test_dir, dump_dir, &name) {
            warn!(test = %name, error = %e, "failed to dump rendered output");
        }
    }

    report
}

async fn execute_test(
    config: &Config,
    parent: &TemplateEngine,
    haproxy: &HaproxyCheck,
    test_dir: &Path,
    name: &str,
    definition: &ValidationTest,
) -> Result<TestReport> {
    std::fs::create_dir_all(test_dir)?;

    // fresh engine per test: cloned filter set, temp-rooted paths
    let engine = Arc::new(TemplateEngine::new(
        EngineType::Jinja2,
        config.templates.flat_namespace()?,
        parent.filter_set().clone(),
        parent.function_set().clone(),
        config.post_processors.clone(),
        PathResolver::rooted_at(test_dir),
    )?);
    if parent.tracing_enabled() {
        engine.enable_tracing();
    }

    let stores = build_fixture_stores(config, definition)?;
    let renderer = Renderer::with_engine(Arc::clone(&engine), config);

    let http_fixtures = if definition.http_fixtures.is_empty() {
        None
    } else {
        Some(&definition.http_fixtures)
    };

    let (context, _registry) = renderer.context(&stores, http_fixtures);
    let render_outcome = renderer.render_with_fixtures(&stores, http_fixtures);

    let (bundle, render_error) = match render_outcome {
        Ok(bundle) => (Some(bundle), None),
        Err(e) => (
            None,
            Some(Error::simplify_render_message(&e.to_string())),
        ),
    };

    let inputs = AssertionInputs {
        bundle: bundle.as_ref(),
        render_error: render_error.as_deref(),
        context_json: Some(&context.json),
        haproxy,
        temp_root: test_dir,
    };

    let mut assertions = Vec::with_capacity(definition.assertions.len());
    for assertion in &definition.assertions {
        assertions.push(run_assertion(assertion, &inputs).await);
    }

    let all_passed = assertions.iter().all(|a| a.passed);
    let expects_render_error = definition.assertions.iter().any(|a| {
        a.target == "rendering_error"
            || matches!(
                a.kind,
                haptic_config::AssertionKind::RenderingError { .. }
            )
    });
    let passed = match &render_error {
        None => all_passed,
        Some(_) => expects_render_error && all_passed,
    };

    // keep rendered output on disk for --dump-rendered before cleanup
    if let Some(bundle) = &bundle {
        let _ = write_bundle(bundle, test_dir);
    }

    parent.append_trace(&engine.take_trace_output());

    Ok(TestReport {
        name: name.to_string(),
        description: definition.description.clone(),
        passed,
        render_error,
        assertions,
    })
}

/// One store per watched resource type, empty when the test has no fixtures
/// for it, plus the reserved `haproxy-pods` store. Fixture types outside the
/// watched set get an ad-hoc `(namespace, name)` store.
fn build_fixture_stores(config: &Config, test: &ValidationTest) -> Result<StoreSet> {
    let mut stores = StoreSet::new();

    for (resource_type, spec) in &config.watched_resources {
        let store = Store::new(Indexer::new(
            spec.index_by.clone(),
            spec.ignore_fields.clone(),
        ));
        if let Some(fixtures) = test.fixtures.get(resource_type) {
            for fixture in fixtures {
                store.update(Resource::new(fixture.clone())?)?;
            }
        }
        stores.insert(resource_type.clone(), Arc::new(store) as Arc<dyn StoreRead>);
    }

    let pods = Store::new(Indexer::new(
        vec!["metadata.namespace".into(), "metadata.name".into()],
        vec![],
    ));
    if let Some(fixtures) = test.fixtures.get(HAPROXY_PODS_STORE) {
        for fixture in fixtures {
            pods.update(Resource::new(fixture.clone())?)?;
        }
    }
    stores.insert(HAPROXY_PODS_STORE, Arc::new(pods) as Arc<dyn StoreRead>);

    for (resource_type, fixtures) in &test.fixtures {
        if stores.contains(resource_type) {
            continue;
        }
        warn!(resource_type, "fixtures for a resource type that is not watched");
        let store = Store::new(Indexer::new(
            vec!["metadata.namespace".into(), "metadata.name".into()],
            vec![],
        ));
        for fixture in fixtures {
            store.update(Resource::new(fixture.clone())?)?;
        }
        stores.insert(resource_type.clone(), Arc::new(store) as Arc<dyn StoreRead>);
    }

    Ok(stores)
}

fn dump_rendered(test_dir: &Path, dump_dir: &Path, test_name: &str) -> std::io::Result<()> {
    let target = dump_dir.join(test_name);
    std::fs::create_dir_all(&target)?;
    copy_tree(test_dir, &target)
}

fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    if !from.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let dest = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            std::fs::create_dir_all(&dest)?;
            copy_tree(&entry.path(), &dest)?;
        } else {
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}
