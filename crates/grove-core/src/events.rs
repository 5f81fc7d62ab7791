//! Change events and the listener registry that delivers them

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{ReentrantMutex, RwLock};
use serde::Serialize;
use tracing::{debug, error};

use crate::delta::ElementDelta;

/// When in the model lifecycle an event was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeEventKind {
    /// The model changed because the store or a working copy mode changed.
    PostChange,
    /// A working copy was reconciled with its buffer.
    PostReconcile,
}

/// A single notification carrying exactly one delta tree.
#[derive(Debug, Clone, Serialize)]
pub struct ElementChangeEvent {
    pub kind: ChangeEventKind,
    pub delta: ElementDelta,
    pub timestamp: DateTime<Utc>,
}

impl ElementChangeEvent {
    pub fn new(kind: ChangeEventKind, delta: ElementDelta) -> Self {
        ElementChangeEvent {
            kind,
            delta,
            timestamp: Utc::now(),
        }
    }
}

/// Receives model change events.
pub trait ElementChangeListener: Send + Sync {
    fn element_changed(&self, event: &ElementChangeEvent);
}

impl<F> ElementChangeListener for F
where
    F: Fn(&ElementChangeEvent) + Send + Sync,
{
    fn element_changed(&self, event: &ElementChangeEvent) {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Ordered listener registry.
///
/// Deliveries are serialized: one event reaches every listener before the
/// next event starts. A panicking listener is logged and skipped.
#[derive(Default)]
pub(crate) struct Notifier {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn ElementChangeListener>)>>,
    // Reentrant so a listener may trigger a nested event on the same thread.
    fire_lock: ReentrantMutex<()>,
}

impl Notifier {
    pub(crate) fn add(&self, listener: Arc<dyn ElementChangeListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub(crate) fn clear(&self) {
        self.listeners.write().clear();
    }

    pub(crate) fn fire(&self, event: &ElementChangeEvent) {
        let _guard = self.fire_lock.lock();
        let listeners: Vec<_> = self.listeners.read().clone();
        debug!("Delivering {:?} event to {} listeners", event.kind, listeners.len());
        for (id, listener) in listeners {
            let delivered = catch_unwind(AssertUnwindSafe(|| listener.element_changed(event)));
            if let Err(panic) = delivered {
                error!("Change listener {:?} panicked: {}", id, panic_message(&*panic));
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
