//! Template rendering engine for HAPTIC
//!
//! Pre-compiles a flat namespace of Jinja-style templates (via minijinja)
//! with the controller's custom filter set, the `compute_once` block, render
//! tracing, and per-template post-processors. Also home to the
//! [`path::PathResolver`] mapping logical auxiliary names to dataplane paths
//! and the [`registry::FileRegistry`] collecting files templates register
//! dynamically while rendering.

pub mod compute_once;
pub mod engine;
pub mod filters;
pub mod functions;
pub mod path;
pub mod post_process;
pub mod registry;

pub use engine::{EngineType, TemplateEngine};
pub use filters::FilterSet;
pub use functions::FunctionSet;
pub use path::{FileKind, PathResolver};
pub use registry::{AuxiliaryFiles, FileRegistry, RenderedFile};
