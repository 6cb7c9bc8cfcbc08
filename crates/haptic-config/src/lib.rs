//! Configuration model for HAPTIC
//!
//! A [`Config`] is one immutable revision of the user-supplied spec: which
//! resources to watch, the template sources to render, embedded validation
//! tests, dataplane directory layout, and per-template post-processors.
//! Revisions are replaced atomically when the source ConfigMap/CRD changes.

pub mod model;
pub mod settings;
pub mod test_definitions;

pub use model::{
    Config, DataplaneConfig, PostProcessorSpec, Snippet, TemplateSources,
};
pub use settings::Settings;
pub use test_definitions::{
    Assertion, AssertionKind, AssertionTarget, ValidationTest, GLOBAL_TEST_NAME,
};
