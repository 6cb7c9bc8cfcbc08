//! In-process event bus with pre-start buffering
//!
//! Components are wired in arbitrary order during staged startup; events
//! published before [`EventBus::start`] are buffered and replayed FIFO once
//! the bus goes live. Each subscriber owns a bounded queue — a slow consumer
//! loses events instead of stalling producers.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::warn;

/// Events exchanged between controller components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A config revision was read from its source
    ConfigLoaded,
    /// The loaded revision passed validation
    ConfigValidated,
    /// The loaded revision was rejected; the previous revision stays active
    ConfigInvalid { reason: String },
    /// Stage two complete, watchers may start
    ControllerStarted,
    /// A watched resource changed in the store
    ResourceChanged { resource_type: String },
    /// A watcher finished its initial list/sync
    ResourceSyncComplete { resource_type: String },
    /// Every watched resource type has completed its initial sync
    IndexSynchronized,
    /// The debounced reconciler wants a render+push cycle
    ReconcileRequested,
    /// Graceful shutdown initiated
    ShutdownRequested,
}

/// How many events the bus retains before `start`; overflow drops oldest.
const PRESTART_BUFFER_CAPACITY: usize = 1024;

struct BusInner {
    subscribers: Vec<mpsc::Sender<Event>>,
    buffer: VecDeque<Event>,
    started: bool,
}

/// Bounded-fanout pub/sub bus.
pub struct EventBus {
    inner: Mutex<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BusInner {
                subscribers: Vec::new(),
                buffer: VecDeque::new(),
                started: false,
            }),
        }
    }

    /// Register a subscriber with its own queue of at most `capacity` events.
    ///
    /// Callable before or after `start`.
    pub fn subscribe(&self, capacity: usize) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let mut inner = self.inner.lock().expect("event bus lock poisoned");
        inner.subscribers.push(tx);
        rx
    }

    /// Publish an event.
    ///
    /// Before `start` the event is buffered; after, it fans out immediately.
    /// Never blocks: a full subscriber queue drops the event for that
    /// subscriber only. Closed subscribers are pruned.
    pub fn publish(&self, event: Event) {
        let mut inner = self.inner.lock().expect("event bus lock poisoned");
        if !inner.started {
            if inner.buffer.len() >= PRESTART_BUFFER_CAPACITY {
                let dropped = inner.buffer.pop_front();
                warn!(?dropped, "pre-start event buffer full, dropping oldest");
            }
            inner.buffer.push_back(event);
            return;
        }
        fan_out(&mut inner.subscribers, &event);
    }

    /// Transition from buffering to live mode, draining the buffer FIFO to
    /// every current subscriber. Idempotent.
    pub fn start(&self) {
        let mut inner = self.inner.lock().expect("event bus lock poisoned");
        if inner.started {
            return;
        }
        inner.started = true;
        let buffered: Vec<Event> = inner.buffer.drain(..).collect();
        for event in buffered {
            fan_out(&mut inner.subscribers, &event);
        }
    }

    /// Whether `start` has been called.
    pub fn is_started(&self) -> bool {
        self.inner.lock().expect("event bus lock poisoned").started
    }

    /// Current subscriber count, after pruning closed channels.
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.lock().expect("event bus lock poisoned");
        inner.subscribers.retain(|tx| !tx.is_closed());
        inner.subscribers.len()
    }
}

fn fan_out(subscribers: &mut Vec<mpsc::Sender<Event>>, event: &Event) {
    subscribers.retain(|tx| !tx.is_closed());
    for tx in subscribers.iter() {
        match tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(event = ?dropped, "subscriber queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // pruned on the next publish
            }
        }
    }
}
