//! Test execution results and output formats

use serde::Serialize;

use haptic_core::{Error, Result};

/// Result of a single assertion.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionOutcome {
    /// Assertion type tag (`contains`, `haproxy_valid`, ...)
    pub kind: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_size: Option<usize>,
    /// First 200 characters of the target; populated on failure only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_preview: Option<String>,
}

impl AssertionOutcome {
    pub(crate) fn passed(kind: &str, description: &str, target: &str) -> Self {
        Self {
            kind: kind.to_string(),
            description: description.to_string(),
            passed: true,
            error: None,
            target: target.to_string(),
            target_size: None,
            target_preview: None,
        }
    }

    pub(crate) fn failed(
        kind: &str,
        description: &str,
        target: &str,
        error: String,
        target_text: Option<&str>,
    ) -> Self {
        Self {
            kind: kind.to_string(),
            description: description.to_string(),
            passed: false,
            error: Some(error),
            target: target.to_string(),
            target_size: target_text.map(str::len),
            target_preview: target_text.map(|t| preview(t, 200)),
        }
    }
}

pub(crate) fn preview(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// Result of one test: render outcome plus each assertion.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestReport {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub render_error: Option<String>,
    pub assertions: Vec<AssertionOutcome>,
}

/// Aggregated run: `total == passed + failed` always holds.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResults {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub tests: Vec<TestReport>,
}

impl TestResults {
    pub fn from_reports(mut tests: Vec<TestReport>) -> Self {
        tests.sort_by(|a, b| a.name.cmp(&b.name));
        let passed = tests.iter().filter(|t| t.passed).count();
        Self {
            total: tests.len(),
            passed,
            failed: tests.len() - passed,
            tests,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    /// Human-readable summary, one block per failing test.
    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        for test in &self.tests {
            let status = if test.passed { "PASS" } else { "FAIL" };
            out.push_str(&format!("{status}  {}\n", test.name));
            if test.passed {
                continue;
            }
            if let Some(render_error) = &test.render_error {
                out.push_str(&format!("      rendering failed: {render_error}\n"));
            }
            for assertion in &test.assertions {
                if assertion.passed {
                    continue;
                }
                let label = if assertion.description.is_empty() {
                    assertion.kind.clone()
                } else {
                    format!("{} ({})", assertion.description, assertion.kind)
                };
                out.push_str(&format!(
                    "      assertion failed: {label} on {}\n",
                    assertion.target
                ));
                if let Some(error) = &assertion.error {
                    out.push_str(&format!("        {error}\n"));
                }
                if let (Some(size), Some(preview)) =
                    (assertion.target_size, &assertion.target_preview)
                {
                    out.push_str(&format!(
                        "        target is {size} bytes, starts with:\n        {preview}\n"
                    ));
                }
            }
        }
        out.push_str(&format!(
            "\n{} tests, {} passed, {} failed\n",
            self.total, self.passed, self.failed
        ));
        if self.failed > 0 {
            out.push_str(
                "hint: re-run with --dump-rendered <dir> to inspect outputs, or --trace-templates to follow rendering\n",
            );
        }
        out
    }

    pub fn render(&self, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Summary => Ok(self.render_summary()),
            OutputFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            OutputFormat::Yaml => Ok(serde_yaml::to_string(self)?),
        }
    }
}

/// `-o` output format of `haptic validate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Summary,
    Json,
    Yaml,
}

impl OutputFormat {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "summary" => Ok(Self::Summary),
            "json" => Ok(Self::Json),
            "yaml" => Ok(Self::Yaml),
            other => Err(Error::config(format!(
                "unknown output format '{other}' (summary, json or yaml)"
            ))),
        }
    }
}
