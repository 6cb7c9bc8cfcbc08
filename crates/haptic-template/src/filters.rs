//! Custom template filters
//!
//! The filter set is cloned into every per-worker engine the test runner
//! builds; registration itself happens once per engine at construction.

use std::collections::BTreeSet;

use base64::Engine as _;
use jsonpath::Selector;
use minijinja::value::{Rest, Value};
use minijinja::{Environment, Error as MjError, ErrorKind};

use crate::path::{FileKind, PathResolver};

/// The set of custom filters to register on an engine.
#[derive(Debug, Clone)]
pub struct FilterSet {
    enabled: BTreeSet<String>,
}

impl FilterSet {
    pub const STANDARD_NAMES: &'static [&'static str] = &[
        "glob_match",
        "b64encode",
        "b64decode",
        "get_path",
        "regex_escape",
        "extract",
        "sort_by",
        "group_by",
        "transform",
        "debug",
        "eval",
        "append",
        "merge",
    ];

    /// All standard filters enabled.
    pub fn standard() -> Self {
        Self {
            enabled: Self::STANDARD_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.enabled.contains(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.enabled.iter().cloned().collect()
    }
}

impl Default for FilterSet {
    fn default() -> Self {
        Self::standard()
    }
}

pub(crate) fn register_filters(
    env: &mut Environment<'static>,
    set: &FilterSet,
    resolver: &PathResolver,
) {
    if set.contains("glob_match") {
        env.add_filter("glob_match", glob_match);
    }
    if set.contains("b64encode") {
        env.add_filter("b64encode", b64encode);
    }
    if set.contains("b64decode") {
        env.add_filter("b64decode", b64decode);
    }
    if set.contains("get_path") {
        let resolver = resolver.clone();
        env.add_filter("get_path", move |name: &str, kind: &str| {
            get_path(&resolver, name, kind)
        });
    }
    if set.contains("regex_escape") {
        env.add_filter("regex_escape", |s: &str| regex::escape(s));
    }
    if set.contains("extract") {
        env.add_filter("extract", extract);
    }
    if set.contains("sort_by") {
        env.add_filter("sort_by", sort_by);
    }
    if set.contains("group_by") {
        env.add_filter("group_by", group_by);
    }
    if set.contains("transform") {
        env.add_filter("transform", transform);
    }
    if set.contains("debug") {
        env.add_filter("debug", debug);
    }
    if set.contains("eval") {
        env.add_filter("eval", eval);
    }
    if set.contains("append") {
        env.add_filter("append", append);
    }
    if set.contains("merge") {
        env.add_filter("merge", merge);
    }
}

fn invalid<S: Into<String>>(message: S) -> MjError {
    MjError::new(ErrorKind::InvalidOperation, message.into())
}

/// Keep the strings in `items` matching the glob `pattern`.
fn glob_match(items: Vec<Value>, pattern: &str) -> Result<Value, MjError> {
    let pattern = glob::Pattern::new(pattern)
        .map_err(|e| invalid(format!("invalid glob pattern '{pattern}': {e}")))?;
    let matched: Vec<Value> = items
        .into_iter()
        .filter(|item| item.as_str().is_some_and(|s| pattern.matches(s)))
        .collect();
    Ok(Value::from(matched))
}

fn b64encode(value: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(value.as_bytes())
}

fn b64decode(value: &str) -> Result<String, MjError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(value.trim())
        .map_err(|e| invalid(format!("invalid base64: {e}")))?;
    String::from_utf8(bytes).map_err(|e| invalid(format!("decoded base64 is not UTF-8: {e}")))
}

fn get_path(resolver: &PathResolver, name: &str, kind: &str) -> Result<String, MjError> {
    let kind = FileKind::parse(kind)
        .ok_or_else(|| invalid(format!("unknown path type '{kind}' (map, file or cert)")))?;
    Ok(resolver.get_path(name, kind).display().to_string())
}

fn to_json(value: &Value) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

fn flatten_into(value: &serde_json::Value, out: &mut Vec<serde_json::Value>) {
    match value {
        serde_json::Value::Array(items) => {
            for item in items {
                flatten_into(item, out);
            }
        }
        other => out.push(other.clone()),
    }
}

/// Select `path` across `items`, flattening nested arrays in the result.
fn extract(items: Value, path: &str) -> Result<Value, MjError> {
    let selector =
        Selector::new(path).map_err(|e| invalid(format!("invalid jsonpath '{path}': {e}")))?;
    let json = to_json(&items);
    let mut out = Vec::new();
    for found in selector.find(&json) {
        flatten_into(found, &mut out);
    }
    Ok(Value::from_serialize(&out))
}

#[derive(Debug)]
struct SortKey {
    path: String,
    descending: bool,
    by_existence: bool,
    by_length: bool,
}

impl SortKey {
    fn parse(spec: &str) -> Self {
        let mut spec = spec.trim().to_string();
        let mut descending = false;
        let mut by_existence = false;
        let mut by_length = false;
        loop {
            if let Some(rest) = spec.strip_suffix(":desc") {
                descending = true;
                spec = rest.trim_end().to_string();
            } else if let Some(rest) = spec.strip_suffix(":exists") {
                by_existence = true;
                spec = rest.trim_end().to_string();
            } else {
                break;
            }
        }
        if let Some((path, modifier)) = spec.split_once('|') {
            if modifier.trim() == "length" {
                by_length = true;
                spec = path.trim_end().to_string();
            }
        }
        Self {
            path: spec,
            descending,
            by_existence,
            by_length,
        }
    }
}

fn lookup_dotted<'v>(value: &'v serde_json::Value, path: &str) -> Option<&'v serde_json::Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn compare_json(a: Option<&serde_json::Value>, b: Option<&serde_json::Value>) -> std::cmp::Ordering {
    use serde_json::Value as J;
    use std::cmp::Ordering;
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a, b) {
            (J::Number(x), J::Number(y)) => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
            (J::String(x), J::String(y)) => x.cmp(y),
            (J::Bool(x), J::Bool(y)) => x.cmp(y),
            _ => a.to_string().cmp(&b.to_string()),
        },
    }
}

fn json_length(value: Option<&serde_json::Value>) -> usize {
    match value {
        Some(serde_json::Value::Array(items)) => items.len(),
        Some(serde_json::Value::Object(map)) => map.len(),
        Some(serde_json::Value::String(s)) => s.len(),
        _ => 0,
    }
}

/// Stable multi-key sort with `:desc`, `:exists` and `| length` modifiers.
fn sort_by(items: Vec<Value>, keys: Rest<String>) -> Result<Value, MjError> {
    if keys.is_empty() {
        return Err(invalid("sort_by requires at least one key"));
    }
    let parsed: Vec<SortKey> = keys.iter().map(|k| SortKey::parse(k)).collect();
    let mut pairs: Vec<(serde_json::Value, Value)> =
        items.into_iter().map(|v| (to_json(&v), v)).collect();
    pairs.sort_by(|(a, _), (b, _)| {
        for key in &parsed {
            let left = lookup_dotted(a, &key.path);
            let right = lookup_dotted(b, &key.path);
            let ordering = if key.by_existence {
                left.is_some().cmp(&right.is_some())
            } else if key.by_length {
                json_length(left).cmp(&json_length(right))
            } else {
                compare_json(left, right)
            };
            let ordering = if key.descending {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != std::cmp::Ordering::Equal {
                return ordering;
            }
        }
        std::cmp::Ordering::Equal
    });
    Ok(Value::from(
        pairs.into_iter().map(|(_, v)| v).collect::<Vec<Value>>(),
    ))
}

fn stringify_json(value: Option<&serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::Bool(b)) => b.to_string(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Group items by the stringified value at the dotted `key` path.
fn group_by(items: Vec<Value>, key: &str) -> Value {
    let mut groups: std::collections::BTreeMap<String, Vec<serde_json::Value>> =
        std::collections::BTreeMap::new();
    for item in &items {
        let json = to_json(item);
        let group = stringify_json(lookup_dotted(&json, key));
        groups.entry(group).or_default().push(json);
    }
    Value::from_serialize(&groups)
}

/// Regex-rewrite every string item; non-strings pass through untouched.
fn transform(items: Vec<Value>, pattern: &str, replacement: &str) -> Result<Value, MjError> {
    let pattern = regex::Regex::new(pattern)
        .map_err(|e| invalid(format!("invalid pattern '{pattern}': {e}")))?;
    let out: Vec<Value> = items
        .into_iter()
        .map(|item| match item.as_str() {
            Some(s) => Value::from(pattern.replace_all(s, replacement).into_owned()),
            None => item,
        })
        .collect();
    Ok(Value::from(out))
}

/// Render the value as a JSON comment block for in-config debugging.
fn debug(value: Value, label: Option<&str>) -> String {
    let pretty = serde_json::to_string_pretty(&to_json(&value))
        .unwrap_or_else(|_| "<unprintable>".to_string());
    let mut out = match label {
        Some(label) => format!("# debug({label}):\n"),
        None => "# debug:\n".to_string(),
    };
    for line in pretty.lines() {
        out.push_str("# ");
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// First JSONPath match against the value, or undefined when none.
fn eval(value: Value, path: &str) -> Result<Value, MjError> {
    let selector =
        Selector::new(path).map_err(|e| invalid(format!("invalid jsonpath '{path}': {e}")))?;
    let json = to_json(&value);
    Ok(selector
        .find(&json)
        .next()
        .map(Value::from_serialize)
        .unwrap_or(Value::UNDEFINED))
}

/// Append returning the list, enabling `{% set x = x | append(y) %}`.
fn append(items: Vec<Value>, item: Value) -> Value {
    let mut items = items;
    items.push(item);
    Value::from(items)
}

/// Shallow-merge `other` into `dict`, returning the merged dict.
fn merge(dict: Value, other: Value) -> Result<Value, MjError> {
    let serde_json::Value::Object(mut base) = to_json(&dict) else {
        return Err(invalid("merge requires a mapping receiver"));
    };
    let serde_json::Value::Object(overlay) = to_json(&other) else {
        return Err(invalid("merge requires a mapping argument"));
    };
    for (key, value) in overlay {
        base.insert(key, value);
    }
    Ok(Value::from_serialize(&base))
}
