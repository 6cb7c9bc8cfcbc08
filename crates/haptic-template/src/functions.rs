//! Custom global functions available to templates

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};

use minijinja::{Environment, Error as MjError, ErrorKind, State};

use crate::compute_once::RENDER_ID_VAR;

/// Per-render markers for `compute_once` blocks: `(render id, variable)`.
pub(crate) type ComputeOnceMarkers = Arc<Mutex<HashSet<(u64, String)>>>;

/// The set of global functions to register; cloned into per-worker engines.
#[derive(Debug, Clone)]
pub struct FunctionSet {
    enabled: BTreeSet<String>,
}

impl FunctionSet {
    pub const STANDARD_NAMES: &'static [&'static str] = &["fail"];

    /// All standard functions enabled.
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

impl Default for FunctionSet {
    fn default() -> Self {
        Self::standard()
    }
}

pub(crate) fn register_functions(
    env: &mut Environment<'static>,
    set: &FunctionSet,
    markers: ComputeOnceMarkers,
) {
    if set.contains("fail") {
        env.add_function("fail", fail);
    }
    // engine-internal, always present: compiled compute_once blocks call it
    env.add_function("__compute_once", move |state: &State, key: String| {
        compute_once_guard(state, &key, &markers)
    });
}

/// Halt rendering with `message`; the template-level way to report missing
/// required data.
fn fail(message: String) -> Result<minijinja::value::Value, MjError> {
    Err(MjError::new(ErrorKind::InvalidOperation, message))
}

fn compute_once_guard(
    state: &State,
    key: &str,
    markers: &ComputeOnceMarkers,
) -> Result<bool, MjError> {
    let defined = state.lookup(key).map(|v| !v.is_undefined()).unwrap_or(false);
    if !defined {
        return Err(MjError::new(
            ErrorKind::UndefinedError,
            format!("compute_once variable '{key}' must be set before the block"),
        ));
    }
    let render_id = state
        .lookup(RENDER_ID_VAR)
        .and_then(|v| u64::try_from(v).ok())
        .unwrap_or(0);
    let mut markers = markers.lock().expect("compute_once marker lock poisoned");
    Ok(markers.insert((render_id, key.to_string())))
}
