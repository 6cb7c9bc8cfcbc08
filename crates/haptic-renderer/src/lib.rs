//! Rendering pipeline for HAPTIC
//!
//! Turns a set of resource stores plus a compiled [`haptic_template`] engine
//! into one [`render::RenderedBundle`]: the main `haproxy.cfg` text and the
//! merged static + dynamic auxiliary files.

pub mod context;
pub mod render;
pub mod stores;

pub use context::RenderContext;
pub use render::{RenderedBundle, Renderer};
pub use stores::{StoreHandle, StoreSet, HAPROXY_PODS_STORE};
