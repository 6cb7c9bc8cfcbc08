//! End-to-end rendering pipeline: config revision -> stores -> bundle,
//! and the embedded test runner over the same revision.

use haptic_integration_tests::{load_config, service, store_of, store_set};
use haptic_renderer::Renderer;
use haptic_template::FileKind;
use haptic_validation::TestRunner;

const FULL_CONFIG: &str = r##"
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
    {% include "shared-acls" %}
    {%- for name in snippets %}
    {% include name %}
    {%- endfor %}
    {%- for svc in resources.services.list() %}
    backend {{ svc.metadata.namespace }}-{{ svc.metadata.name }}
      server {{ svc.metadata.name }} {{ svc.spec.clusterIP }}:80
    {%- endfor %}
  snippets:
    shared-acls: |
      {%- set acls = namespace(rendered=0) %}
      {%- compute_once acls %}
      {%- set acls.rendered = acls.rendered + 1 %}
      # shared acls ({{ acls.rendered }})
      {%- endcompute_once %}
    zz-early:
      template: "# early snippet"
      priority: 10
    aa-late:
      template: "# late snippet"
      priority: 800
  maps:
    hosts.map: |
      {%- for svc in resources.services.list() %}
      {{ svc.metadata.name }}.example.com {{ svc.metadata.namespace }}-{{ svc.metadata.name }}
      {%- endfor %}
postProcessors:
  haproxy.cfg:
    - type: regex_replace
      pattern: "[ \t]+$"
      replacement: ""
validationTests:
  _global:
    fixtures:
      services:
        - apiVersion: v1
          kind: Service
          metadata: {namespace: default, name: shared-api}
          spec: {clusterIP: 10.0.0.9}
  renders-backends:
    description: every service becomes a backend
    assertions:
      - type: contains
        pattern: "backend default-shared-api"
      - type: contains
        target: "map:hosts.map"
        pattern: "shared-api\\.example\\.com"
      - type: match_count
        pattern: "backend "
        expected: 1
  snippet-order:
    assertions:
      - type: match_order
        patterns: ["# early snippet", "# late snippet"]
  context-shape:
    assertions:
      - type: jsonpath
        path: "$.resources.services[0].metadata.name"
        expected: shared-api
"##;

#[test]
fn test_full_bundle_rendering() {
    let config = load_config(FULL_CONFIG);
    let renderer = Renderer::from_config(&config).unwrap();

    let stores = store_set(&[(
        "services",
        store_of(&[
            service("default", "web", "10.0.0.1"),
            service("default", "api", "10.0.0.2"),
        ]),
    )]);
    let bundle = renderer.render_with_stores(&stores).unwrap();

    // backends for every service
    assert!(bundle.haproxy_cfg.contains("backend default-web"));
    assert!(bundle.haproxy_cfg.contains("server api 10.0.0.2:80"));

    // snippet priority ordering inside the main config
    let early = bundle.haproxy_cfg.find("# early snippet").unwrap();
    let late = bundle.haproxy_cfg.find("# late snippet").unwrap();
    assert!(early < late);

    // compute_once body ran exactly once for the render
    assert!(bundle.haproxy_cfg.contains("# shared acls (1)"));

    // pre-declared map rendered from the same context
    let map = bundle.files.find(FileKind::Map, "hosts.map").unwrap();
    assert!(map.content.contains("web.example.com default-web"));
    assert!(map.content.contains("api.example.com default-api"));

    // post-processor stripped trailing whitespace everywhere
    assert!(!bundle.haproxy_cfg.lines().any(|l| l.ends_with(' ')));
}

#[test]
fn test_rendering_is_deterministic() {
    let config = load_config(FULL_CONFIG);
    let renderer = Renderer::from_config(&config).unwrap();
    let stores = store_set(&[(
        "services",
        store_of(&[service("default", "web", "10.0.0.1")]),
    )]);
    let first = renderer.render_with_stores(&stores).unwrap();
    let second = renderer.render_with_stores(&stores).unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_embedded_tests_pass_end_to_end() {
    let config = load_config(FULL_CONFIG);
    let runner = TestRunner::new(config).unwrap();
    let results = runner.run_tests(None).await.unwrap();
    assert_eq!(results.total, 3, "{}", results.render_summary());
    assert_eq!(results.total, results.passed + results.failed);
    assert!(results.all_passed(), "{}", results.render_summary());
}

#[tokio::test]
async fn test_dynamic_registration_overrides_predeclared() {
    let config = load_config(
        r#"
templates:
  haproxyCfg: |
    {%- set path = file_registry.register_map_file("hosts.map", "dynamic-entry 1") %}
    # using {{ path }}
  maps:
    hosts.map: "static-entry 0"
validationTests:
  dynamic-wins:
    assertions:
      - type: equals
        target: "map:hosts.map"
        expected: "dynamic-entry 1"
      - type: not_contains
        target: "map:hosts.map"
        pattern: "static-entry"
"#,
    );
    let results = TestRunner::new(config)
        .unwrap()
        .run_tests(None)
        .await
        .unwrap();
    assert!(results.all_passed(), "{}", results.render_summary());
}

#[tokio::test]
async fn test_failing_assertion_reports_context() {
    let config = load_config(
        r#"
templates:
  haproxyCfg: "global\n  maxconn 100\n"
validationTests:
  will-fail:
    assertions:
      - type: contains
        pattern: "maxconn 9999"
        description: expects the wrong limit
"#,
    );
    let results = TestRunner::new(config)
        .unwrap()
        .run_tests(None)
        .await
        .unwrap();
    assert_eq!(results.failed, 1);
    let report = &results.tests[0];
    let assertion = &report.assertions[0];
    assert!(!assertion.passed);
    assert_eq!(assertion.target_size, Some("global\n  maxconn 100\n".len()));
    assert!(assertion.target_preview.as_deref().unwrap().contains("maxconn 100"));

    let summary = results.render_summary();
    assert!(summary.contains("FAIL  will-fail"));
    assert!(summary.contains("expects the wrong limit"));
}
