//! Index synchronization tracking
//!
//! Startup stage four blocks until every watched resource type has reported
//! its initial sync exactly once; the tracker folds the per-type events into
//! one `IndexSynchronized`.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use haptic_core::{Event, EventBus};

/// Tracks which watched resource types have completed their initial sync.
#[derive(Debug)]
pub struct IndexSynchronizationTracker {
    expected: BTreeSet<String>,
    seen: BTreeSet<String>,
}

impl IndexSynchronizationTracker {
    pub fn new<I, S>(expected: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            expected: expected.into_iter().map(Into::into).collect(),
            seen: BTreeSet::new(),
        }
    }

    /// Record one sync completion; returns true when this completion was the
    /// last missing one. Duplicates are ignored, unknown types warned about.
    pub fn record(&mut self, resource_type: &str) -> bool {
        if !self.expected.contains(resource_type) {
            warn!(resource_type, "sync completion for an unwatched resource type");
            return false;
        }
        if !self.seen.insert(resource_type.to_string()) {
            debug!(resource_type, "duplicate sync completion ignored");
            return false;
        }
        debug!(
            resource_type,
            synced = self.seen.len(),
            expected = self.expected.len(),
            "resource type synced"
        );
        self.seen == self.expected
    }

    pub fn is_complete(&self) -> bool {
        self.seen == self.expected
    }

    /// Consume sync events from the bus until every type has reported, then
    /// publish `IndexSynchronized` and return.
    pub async fn run(mut self, mut rx: mpsc::Receiver<Event>, bus: Arc<EventBus>) {
        // nothing to wait for; an empty watch set is synchronized by definition
        if self.expected.is_empty() {
            info!("no watched resources; index synchronized trivially");
            bus.publish(Event::IndexSynchronized);
            return;
        }
        while let Some(event) = rx.recv().await {
            if let Event::ResourceSyncComplete { resource_type } = event {
                if self.record(&resource_type) {
                    info!("all watched resource types synchronized");
                    bus.publish(Event::IndexSynchronized);
                    return;
                }
            }
        }
    }
}
