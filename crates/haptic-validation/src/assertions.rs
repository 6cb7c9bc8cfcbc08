//! Assertion dispatch
//!
//! Each assertion is a tagged variant resolved against the rendered bundle,
//! the captured render error, or the rendering context. Invalid regexes and
//! missing targets surface as failed outcomes, never as runner crashes.

use std::path::Path;

use haptic_config::{Assertion, AssertionKind, AssertionTarget};
use haptic_renderer::RenderedBundle;
use haptic_template::FileKind;

use crate::haproxy::HaproxyCheck;
use crate::results::{preview, AssertionOutcome};

/// Everything one assertion may inspect.
pub(crate) struct AssertionInputs<'a> {
    pub bundle: Option<&'a RenderedBundle>,
    pub render_error: Option<&'a str>,
    pub context_json: Option<&'a serde_json::Value>,
    pub haproxy: &'a HaproxyCheck,
    pub temp_root: &'a Path,
}

pub(crate) async fn run_assertion(
    assertion: &Assertion,
    inputs: &AssertionInputs<'_>,
) -> AssertionOutcome {
    let kind = assertion.kind.name();
    let description = assertion.description.as_str();

    let target = match assertion.resolved_target() {
        Ok(target) => target,
        Err(e) => {
            return AssertionOutcome::failed(kind, description, &assertion.target, e.to_string(), None)
        }
    };

    // rendering_error assertions read the captured error, everything else
    // needs a successfully rendered target
    if matches!(assertion.kind, AssertionKind::RenderingError { .. })
        || target == AssertionTarget::RenderingError
    {
        return run_rendering_error_assertion(assertion, inputs, kind, description);
    }

    let Some(bundle) = inputs.bundle else {
        let error = match inputs.render_error {
            Some(e) => format!("rendering failed, no output to assert on: {e}"),
            None => "rendering produced no output".to_string(),
        };
        return AssertionOutcome::failed(kind, description, &assertion.target, error, None);
    };

    if let AssertionKind::HaproxyValid = &assertion.kind {
        return match inputs.haproxy.validate(bundle, inputs.temp_root).await {
            Ok(()) => AssertionOutcome::passed(kind, description, &assertion.target),
            Err(e) => AssertionOutcome::failed(
                kind,
                description,
                &assertion.target,
                e.to_string(),
                Some(&bundle.haproxy_cfg),
            ),
        };
    }

    if let AssertionKind::Jsonpath { path, expected } = &assertion.kind {
        return run_jsonpath_assertion(
            path,
            expected.as_ref(),
            inputs.context_json,
            kind,
            description,
            &assertion.target,
        );
    }

    // the remaining kinds compare against the resolved target text
    let text = match resolve_target_text(&target, bundle) {
        Ok(text) => text,
        Err(error) => {
            return AssertionOutcome::failed(kind, description, &assertion.target, error, None)
        }
    };

    match &assertion.kind {
        AssertionKind::Contains { pattern } => {
            match_regex(pattern, text, true, kind, description, &assertion.target)
        }
        AssertionKind::NotContains { pattern } => {
            match_regex(pattern, text, false, kind, description, &assertion.target)
        }
        AssertionKind::MatchCount { pattern, expected } => {
            match compile(pattern) {
                Ok(re) => {
                    let found = re.find_iter(text).count();
                    if found == *expected {
                        AssertionOutcome::passed(kind, description, &assertion.target)
                    } else {
                        AssertionOutcome::failed(
                            kind,
                            description,
                            &assertion.target,
                            format!("pattern '{pattern}' matched {found} times, expected {expected}"),
                            Some(text),
                        )
                    }
                }
                Err(error) => {
                    AssertionOutcome::failed(kind, description, &assertion.target, error, None)
                }
            }
        }
        AssertionKind::Equals { expected } => {
            if text == expected {
                AssertionOutcome::passed(kind, description, &assertion.target)
            } else {
                AssertionOutcome::failed(
                    kind,
                    description,
                    &assertion.target,
                    format!(
                        "expected exactly '{}', got '{}'",
                        preview(expected, 200),
                        preview(text, 200)
                    ),
                    Some(text),
                )
            }
        }
        AssertionKind::MatchOrder { patterns } => {
            run_match_order(patterns, text, kind, description, &assertion.target)
        }
        // handled above
        AssertionKind::HaproxyValid
        | AssertionKind::Jsonpath { .. }
        | AssertionKind::RenderingError { .. } => unreachable!("dispatched earlier"),
    }
}

fn run_rendering_error_assertion(
    assertion: &Assertion,
    inputs: &AssertionInputs<'_>,
    kind: &str,
    description: &str,
) -> AssertionOutcome {
    let pattern = match &assertion.kind {
        AssertionKind::RenderingError { pattern } => pattern,
        AssertionKind::Contains { pattern } => pattern,
        other => {
            return AssertionOutcome::failed(
                kind,
                description,
                &assertion.target,
                format!(
                    "assertion type '{}' cannot target rendering_error",
                    other.name()
                ),
                None,
            )
        }
    };
    let Some(render_error) = inputs.render_error else {
        return AssertionOutcome::failed(
            kind,
            description,
            &assertion.target,
            "rendering succeeded but a rendering error was expected".to_string(),
            None,
        );
    };
    match compile(pattern) {
        Ok(re) if re.is_match(render_error) => {
            AssertionOutcome::passed(kind, description, &assertion.target)
        }
        Ok(_) => AssertionOutcome::failed(
            kind,
            description,
            &assertion.target,
            format!("render error did not match '{pattern}'"),
            Some(render_error),
        ),
        Err(error) => AssertionOutcome::failed(kind, description, &assertion.target, error, None),
    }
}

fn run_jsonpath_assertion(
    path: &str,
    expected: Option<&serde_json::Value>,
    context_json: Option<&serde_json::Value>,
    kind: &str,
    description: &str,
    target: &str,
) -> AssertionOutcome {
    let Some(context) = context_json else {
        return AssertionOutcome::failed(
            kind,
            description,
            target,
            "no rendering context available for jsonpath evaluation".to_string(),
            None,
        );
    };
    let selector = match jsonpath::Selector::new(path) {
        Ok(selector) => selector,
        Err(e) => {
            return AssertionOutcome::failed(
                kind,
                description,
                target,
                format!("invalid jsonpath '{path}': {e}"),
                None,
            )
        }
    };
    let mut matches = selector.find(context);
    match expected {
        None => {
            if matches.next().is_some() {
                AssertionOutcome::passed(kind, description, target)
            } else {
                AssertionOutcome::failed(
                    kind,
                    description,
                    target,
                    format!("jsonpath '{path}' matched nothing in the rendering context"),
                    None,
                )
            }
        }
        Some(expected) => match matches.next() {
            Some(found) if found == expected => {
                AssertionOutcome::passed(kind, description, target)
            }
            Some(found) => AssertionOutcome::failed(
                kind,
                description,
                target,
                format!("jsonpath '{path}' yielded {found}, expected {expected}"),
                None,
            ),
            None => AssertionOutcome::failed(
                kind,
                description,
                target,
                format!("jsonpath '{path}' matched nothing, expected {expected}"),
                None,
            ),
        },
    }
}

fn run_match_order(
    patterns: &[String],
    text: &str,
    kind: &str,
    description: &str,
    target: &str,
) -> AssertionOutcome {
    let mut offset = 0;
    for pattern in patterns {
        let re = match compile(pattern) {
            Ok(re) => re,
            Err(error) => {
                return AssertionOutcome::failed(kind, description, target, error, None)
            }
        };
        match re.find(&text[offset..]) {
            Some(found) => offset += found.end(),
            None => {
                return AssertionOutcome::failed(
                    kind,
                    description,
                    target,
                    format!("pattern '{pattern}' not found after position {offset}"),
                    Some(text),
                )
            }
        }
    }
    AssertionOutcome::passed(kind, description, target)
}

fn match_regex(
    pattern: &str,
    text: &str,
    should_match: bool,
    kind: &str,
    description: &str,
    target: &str,
) -> AssertionOutcome {
    let re = match compile(pattern) {
        Ok(re) => re,
        Err(error) => return AssertionOutcome::failed(kind, description, target, error, None),
    };
    let matched = re.is_match(text);
    if matched == should_match {
        AssertionOutcome::passed(kind, description, target)
    } else if should_match {
        AssertionOutcome::failed(
            kind,
            description,
            target,
            format!("pattern '{pattern}' not found in {target} (is the pattern regex-escaped?)"),
            Some(text),
        )
    } else {
        AssertionOutcome::failed(
            kind,
            description,
            target,
            format!("pattern '{pattern}' unexpectedly found in {target}"),
            Some(text),
        )
    }
}

fn resolve_target_text<'a>(
    target: &AssertionTarget,
    bundle: &'a RenderedBundle,
) -> Result<&'a str, String> {
    match target {
        AssertionTarget::MainConfig => Ok(&bundle.haproxy_cfg),
        AssertionTarget::Map(name) => bundle
            .files
            .find(FileKind::Map, name)
            .map(|f| f.content.as_str())
            .ok_or_else(|| format!("map '{name}' was not rendered")),
        AssertionTarget::GeneralFile(name) => bundle
            .files
            .find(FileKind::GeneralFile, name)
            .or_else(|| bundle.files.find(FileKind::CrtList, name))
            .map(|f| f.content.as_str())
            .ok_or_else(|| format!("file '{name}' was not rendered")),
        AssertionTarget::Certificate(name) => bundle
            .files
            .find(FileKind::Certificate, name)
            .map(|f| f.content.as_str())
            .ok_or_else(|| format!("certificate '{name}' was not rendered")),
        AssertionTarget::RenderingError => {
            Err("rendering_error target resolved as text".to_string())
        }
    }
}

fn compile(pattern: &str) -> Result<regex::Regex, String> {
    regex::Regex::new(pattern).map_err(|e| format!("invalid pattern '{pattern}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use haptic_template::{AuxiliaryFiles, RenderedFile};
    use serde_json::json;

    fn bundle() -> RenderedBundle {
        let mut files = AuxiliaryFiles::default();
        files.upsert(
            FileKind::Map,
            RenderedFile::new("hosts.map", "a.example.com be_a\nb.example.com be_b\n"),
        );
        RenderedBundle {
            haproxy_cfg: "global\n  maxconn 1000\nbackend be_a\nbackend be_b\n".to_string(),
            files,
        }
    }

    fn inputs<'a>(
        bundle: Option<&'a RenderedBundle>,
        render_error: Option<&'a str>,
        context: Option<&'a serde_json::Value>,
        haproxy: &'a HaproxyCheck,
        root: &'a Path,
    ) -> AssertionInputs<'a> {
        AssertionInputs {
            bundle,
            render_error,
            context_json: context,
            haproxy,
            temp_root: root,
        }
    }

    fn assertion(yaml: &str) -> Assertion {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[tokio::test]
    async fn test_contains_pass_and_fail() {
        let bundle = bundle();
        let haproxy = HaproxyCheck::default();
        let dir = tempfile::tempdir().unwrap();
        let inputs = inputs(Some(&bundle), None, None, &haproxy, dir.path());

        let ok = run_assertion(&assertion("type: contains\npattern: maxconn 1000"), &inputs).await;
        assert!(ok.passed);

        let bad =
            run_assertion(&assertion("type: contains\npattern: maxconn 9999"), &inputs).await;
        assert!(!bad.passed);
        assert!(bad.target_preview.is_some());
        assert_eq!(bad.target_size, Some(bundle.haproxy_cfg.len()));
    }

    #[tokio::test]
    async fn test_not_contains() {
        let bundle = bundle();
        let haproxy = HaproxyCheck::default();
        let dir = tempfile::tempdir().unwrap();
        let inputs = inputs(Some(&bundle), None, None, &haproxy, dir.path());

        let ok = run_assertion(
            &assertion("type: not_contains\npattern: 'mode tcp'"),
            &inputs,
        )
        .await;
        assert!(ok.passed);
    }

    #[tokio::test]
    async fn test_match_count_against_map_target() {
        let bundle = bundle();
        let haproxy = HaproxyCheck::default();
        let dir = tempfile::tempdir().unwrap();
        let inputs = inputs(Some(&bundle), None, None, &haproxy, dir.path());

        let ok = run_assertion(
            &assertion(
                "type: match_count\ntarget: 'map:hosts.map'\npattern: 'example\\.com'\nexpected: 2",
            ),
            &inputs,
        )
        .await;
        assert!(ok.passed, "{:?}", ok.error);
    }

    #[tokio::test]
    async fn test_match_order() {
        let bundle = bundle();
        let haproxy = HaproxyCheck::default();
        let dir = tempfile::tempdir().unwrap();
        let inputs = inputs(Some(&bundle), None, None, &haproxy, dir.path());

        let ok = run_assertion(
            &assertion("type: match_order\npatterns: ['backend be_a', 'backend be_b']"),
            &inputs,
        )
        .await;
        assert!(ok.passed);

        let bad = run_assertion(
            &assertion("type: match_order\npatterns: ['backend be_b', 'backend be_a']"),
            &inputs,
        )
        .await;
        assert!(!bad.passed);
    }

    #[tokio::test]
    async fn test_equals_truncates_preview() {
        let bundle = bundle();
        let haproxy = HaproxyCheck::default();
        let dir = tempfile::tempdir().unwrap();
        let inputs = inputs(Some(&bundle), None, None, &haproxy, dir.path());

        let bad = run_assertion(&assertion("type: equals\nexpected: 'nope'"), &inputs).await;
        assert!(!bad.passed);
        assert!(bad.error.unwrap().contains("expected exactly"));
    }

    #[tokio::test]
    async fn test_rendering_error_assertion() {
        let haproxy = HaproxyCheck::default();
        let dir = tempfile::tempdir().unwrap();
        let inputs = inputs(
            None,
            Some("Service 'api' not found"),
            None,
            &haproxy,
            dir.path(),
        );

        let ok = run_assertion(
            &assertion(
                "type: contains\ntarget: rendering_error\npattern: \"Service 'api' not found\"",
            ),
            &inputs,
        )
        .await;
        assert!(ok.passed, "{:?}", ok.error);
    }

    #[tokio::test]
    async fn test_rendering_error_expected_but_render_succeeded() {
        let bundle = bundle();
        let haproxy = HaproxyCheck::default();
        let dir = tempfile::tempdir().unwrap();
        let inputs = inputs(Some(&bundle), None, None, &haproxy, dir.path());

        let bad = run_assertion(
            &assertion("type: rendering_error\ntarget: rendering_error\npattern: anything"),
            &inputs,
        )
        .await;
        assert!(!bad.passed);
    }

    #[tokio::test]
    async fn test_jsonpath_with_expected() {
        let haproxy = HaproxyCheck::default();
        let dir = tempfile::tempdir().unwrap();
        let bundle = bundle();
        let context = json!({"resources": {"services": [{"metadata": {"name": "web"}}]}});
        let inputs = inputs(Some(&bundle), None, Some(&context), &haproxy, dir.path());

        let ok = run_assertion(
            &assertion(
                "type: jsonpath\npath: '$.resources.services[0].metadata.name'\nexpected: web",
            ),
            &inputs,
        )
        .await;
        assert!(ok.passed, "{:?}", ok.error);
    }

    #[tokio::test]
    async fn test_missing_target_fails_cleanly() {
        let bundle = bundle();
        let haproxy = HaproxyCheck::default();
        let dir = tempfile::tempdir().unwrap();
        let inputs = inputs(Some(&bundle), None, None, &haproxy, dir.path());

        let bad = run_assertion(
            &assertion("type: contains\ntarget: 'map:absent.map'\npattern: x"),
            &inputs,
        )
        .await;
        assert!(!bad.passed);
        assert!(bad.error.unwrap().contains("was not rendered"));
    }
}
