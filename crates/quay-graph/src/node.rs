//! The node abstraction shared by every member of the graph.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use quay_core::SyncError;
use quay_core::observers::{ObserverList, SubscriberHandle};

/// Current state of a node.
///
/// A node never holds more than one current value; every new value fully
/// supersedes the prior one. Partial patches never appear above the
/// subscription layer.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeState<T> {
    /// No value has arrived yet.
    Unset,
    /// The latest derived value.
    Value(T),
    /// The latest upstream failure.
    Error(SyncError),
}

impl<T> NodeState<T> {
    /// The value, if set.
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// The error, if in the error state.
    #[must_use]
    pub fn error(&self) -> Option<&SyncError> {
        match self {
            Self::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Whether no value or error has arrived.
    #[must_use]
    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }
}

/// Observer callback for node state changes.
pub type Observer<T> = Box<dyn Fn(&NodeState<T>) + Send + Sync>;

/// A composable unit in the reactive graph.
///
/// Ownership: a node exclusively owns every session and child node it
/// created; `close()` closes all of it, transitively, before resolving.
/// Double-close is a safe no-op. Construction never suspends.
#[async_trait]
pub trait Node<T>: Send + Sync
where
    T: Clone + Send + Sync + 'static,
{
    /// The node's current state.
    fn current(&self) -> NodeState<T>;

    /// Register an observer, notified synchronously in registration order
    /// for every state change after this call.
    fn subscribe(&self, observer: Observer<T>) -> SubscriberHandle;

    /// Close this node and everything it owns.
    async fn close(&self);
}

/// Shared state/observer pair backing each concrete node.
pub(crate) struct NodeCore<T> {
    state: Mutex<NodeState<T>>,
    observers: ObserverList<NodeState<T>>,
}

impl<T: Clone + Send + Sync + 'static> NodeCore<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(NodeState::Unset),
            observers: ObserverList::new(),
        })
    }

    pub(crate) fn current(&self) -> NodeState<T> {
        self.state.lock().clone()
    }

    pub(crate) fn subscribe(&self, observer: Observer<T>) -> SubscriberHandle {
        self.observers.subscribe(move |state| observer(state))
    }

    /// Replace the state and notify observers.
    pub(crate) fn publish(&self, state: NodeState<T>) {
        *self.state.lock() = state.clone();
        self.observers.emit(&state);
    }

    /// Seed the state without notifying, and only if nothing arrived yet.
    /// Used at construction to pick up an upstream's pre-existing value.
    pub(crate) fn seed(&self, state: NodeState<T>) {
        let mut current = self.state.lock();
        if current.is_unset() {
            *current = state;
        }
    }

    pub(crate) fn clear_observers(&self) {
        self.observers.clear();
    }
}
