//! Core building blocks for HAPTIC
//!
//! This crate holds the pieces every other HAPTIC crate builds on:
//! - The shared error taxonomy ([`Error`], [`Result`])
//! - The opaque Kubernetes [`resource::Resource`] model
//! - Composite-key extraction ([`indexer::Indexer`])
//! - Concurrency-safe indexed [`store::Store`]s and the read-only
//!   [`overlay::OverlayStore`] used for admission dry-runs
//! - The in-process [`events::EventBus`] that sequences controller startup

pub mod error;
pub mod events;
pub mod indexer;
pub mod overlay;
pub mod resource;
pub mod store;

pub use error::{Error, Result};
pub use events::{Event, EventBus};
pub use indexer::{IndexKey, Indexer};
pub use overlay::{OverlayOp, OverlayStore};
pub use resource::{Resource, WatchedResourceSpec};
pub use store::{SharedStore, Store, StoreRead};
