//! Change notifications and the collaborator event bus.
//!
//! Two directions:
//!
//! - **Outbound** ([`Emitter`]): the store tells observers that its contents
//!   or its current item changed. Observers get plain values, never live
//!   handles into the store.
//! - **Inbound** ([`EventBus`]): collaborators and background tasks report
//!   lifecycle events from any thread through a cloneable [`EventSender`].
//!   The store's owner drains the bus on its own thread, which is the only
//!   place history is mutated.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::mpsc::{self, Receiver, Sender};

use crate::item::{HistoryItem, RunPayload};
use crate::status::QueryStatus;

type Listener<T> = Rc<RefCell<dyn FnMut(&T)>>;

struct Listeners<T> {
    next_id: u64,
    entries: Vec<(u64, Listener<T>)>,
}

/// Single-threaded observer list.
///
/// Listeners may subscribe or unsubscribe while a notification is being
/// delivered; changes take effect from the next `fire`.
pub struct Emitter<T> {
    listeners: Rc<RefCell<Listeners<T>>>,
}

impl<T: 'static> Default for Emitter<T> {
    fn default() -> Self {
        Emitter {
            listeners: Rc::new(RefCell::new(Listeners {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }
}

impl<T: 'static> Emitter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener`. Keep the returned [`Subscription`] alive for as
    /// long as notifications are wanted; dropping it unsubscribes.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe(&self, listener: impl FnMut(&T) + 'static) -> Subscription {
        let id = {
            let mut listeners = self.listeners.borrow_mut();
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners
                .entries
                .push((id, Rc::new(RefCell::new(listener)) as Listener<T>));
            id
        };

        let weak: Weak<RefCell<Listeners<T>>> = Rc::downgrade(&self.listeners);
        Subscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(listeners) = weak.upgrade() {
                    listeners.borrow_mut().entries.retain(|(i, _)| *i != id);
                }
            })),
        }
    }

    pub fn fire(&self, value: &T) {
        let snapshot: Vec<Listener<T>> = self
            .listeners
            .borrow()
            .entries
            .iter()
            .map(|(_, l)| Rc::clone(l))
            .collect();
        for listener in snapshot {
            // A listener that re-enters its own emitter is skipped for that
            // nested delivery rather than panicking.
            if let Ok(mut f) = listener.try_borrow_mut() {
                f(value);
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().entries.len()
    }
}

/// Handle returned by [`Emitter::subscribe`].
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }
}

/// Lifecycle events delivered to the history owner.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEvent {
    /// A collaborator started a run.
    Added(HistoryItem),
    /// A collaborator reported progress or a final status for run `id`.
    StatusChanged {
        id: String,
        status: QueryStatus,
        failure_reason: Option<String>,
        result_count: Option<u64>,
        /// Fresher collaborator payload, if the collaborator has one.
        run: Option<RunPayload>,
    },
    /// A collaborator dropped run `id` on its side.
    Removed { id: String },
    /// The retention scrubber finished a sweep; entries whose artifacts are
    /// gone should be dropped.
    ArtifactsScrubbed,
}

/// Sending half of the [`EventBus`]. Cheap to clone and safe to move to
/// worker threads.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<HistoryEvent>,
}

impl EventSender {
    /// Queues `event`. Returns false once the bus has been dropped.
    pub fn send(&self, event: HistoryEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Receiving half, owned by whoever owns the history store.
pub struct EventBus {
    tx: Sender<HistoryEvent>,
    rx: Receiver<HistoryEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (tx, rx) = mpsc::channel();
        EventBus { tx, rx }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sender(&self) -> EventSender {
        EventSender {
            tx: self.tx.clone(),
        }
    }

    /// Takes every event queued so far, in arrival order, without blocking.
    pub fn drain(&self) -> Vec<HistoryEvent> {
        self.rx.try_iter().collect()
    }
}
