//! Engine-scoped publish/subscribe primitive.
//!
//! A plain observer list with explicit unsubscribe handles: subscription
//! sessions and reactive nodes notify their observers synchronously, in
//! registration order, on whatever task delivered the triggering event.
//! There is no buffering and no coupling to any UI-framework lifecycle.
//!
//! Callbacks are held as `Arc`s and invoked outside the list lock, so an
//! observer may subscribe, unsubscribe, or read state reentrantly without
//! deadlocking.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Slots<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// An ordered list of observers for values of type `T`.
pub struct ObserverList<T> {
    slots: Arc<Mutex<Slots<T>>>,
}

impl<T: 'static> ObserverList<T> {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Register an observer; it is notified after all earlier registrants.
    pub fn subscribe(&self, observer: impl Fn(&T) + Send + Sync + 'static) -> SubscriberHandle {
        let id = {
            let mut slots = self.slots.lock();
            let id = slots.next_id;
            slots.next_id += 1;
            slots.entries.push((id, Arc::new(observer)));
            id
        };
        let weak: Weak<Mutex<Slots<T>>> = Arc::downgrade(&self.slots);
        SubscriberHandle {
            cancel: Some(Box::new(move || {
                if let Some(slots) = weak.upgrade() {
                    slots.lock().entries.retain(|(entry_id, _)| *entry_id != id);
                }
            })),
        }
    }

    /// Notify every observer, synchronously, in registration order.
    pub fn emit(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = {
            let slots = self.slots.lock();
            slots.entries.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for callback in callbacks {
            callback(value);
        }
    }

    /// Drop every registration. Outstanding handles become no-ops.
    pub fn clear(&self) {
        self.slots.lock().entries.clear();
    }

    /// Number of registered observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().entries.len()
    }

    /// Whether no observers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for ObserverList<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`ObserverList::subscribe`].
///
/// Unsubscription is explicit; dropping the handle keeps the observer
/// registered (the list owner's `clear` is the other way out).
pub struct SubscriberHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriberHandle {
    /// Remove the observer from its list. Safe to call after the list
    /// was cleared or dropped.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for SubscriberHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberHandle")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
