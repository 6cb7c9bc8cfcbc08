//! The `compute_once` block
//!
//! ```text
//! {%- set ns = namespace(value=0) %}
//! {%- compute_once ns %}
//!   {%- set ns.value = ns.value + 1 %}
//! {%- endcompute_once %}
//! ```
//!
//! The body runs at most once per top-level render; repeated entries guarding
//! the same variable are skipped. Rewritten at compile time into a guard on
//! the engine-internal `__compute_once` function, which checks-and-sets a
//! per-render marker and requires the guarded variable to exist.

use once_cell::sync::Lazy;
use regex::Regex;

use haptic_core::{Error, Result};

/// Context variable carrying the current render id.
pub(crate) const RENDER_ID_VAR: &str = "__render_id";

static OPEN_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{%(-?)\s*compute_once\s+([A-Za-z_][A-Za-z0-9_]*)\s*(-?)%\}")
        .expect("compute_once open tag regex")
});

static CLOSE_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{%(-?)\s*endcompute_once\s*(-?)%\}").expect("compute_once close tag regex")
});

/// Rewrite `compute_once` blocks into `__compute_once` guards.
///
/// Whitespace-control dashes on the tags are preserved. Unbalanced tags are
/// a compile error.
pub fn preprocess(template_name: &str, source: &str) -> Result<String> {
    let opens = OPEN_TAG.find_iter(source).count();
    let closes = CLOSE_TAG.find_iter(source).count();
    if opens != closes {
        return Err(Error::compile(
            template_name,
            format!("unbalanced compute_once tags ({opens} open, {closes} close)"),
            source,
        ));
    }
    let rewritten = OPEN_TAG.replace_all(source, "{%$1 if __compute_once(\"$2\") $3%}");
    let rewritten = CLOSE_TAG.replace_all(&rewritten, "{%$1 endif $2%}");
    Ok(rewritten.into_owned())
}
