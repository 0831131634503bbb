//! Leaf node over a list subscription.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::warn;

use quay_client::{SessionEvent, SessionValue, SubscriptionSession};
use quay_core::observers::{ObserverList, SubscriberHandle};
use quay_core::{Decoder, Keyed, SyncError};

use crate::node::{Node, NodeCore, NodeState, Observer};

/// One incremental change to the element set.
///
/// For consumers that want fine-grained updates (incremental UI) in
/// addition to the aggregate sequence.
#[derive(Clone, Debug)]
pub enum ElementEvent<T> {
    /// The whole set was replaced.
    Refresh(Vec<Keyed<T>>),
    /// One element inserted.
    Insert(Keyed<T>),
    /// One element updated in place.
    Update(Keyed<T>),
    /// One element removed.
    Remove {
        /// Key of the removed element.
        key: String,
    },
}

/// Wraps one list-kind [`SubscriptionSession`], exposing the decoded
/// element sequence as the aggregate value plus per-element notifications.
///
/// Element order is the session's key-map insertion order: stable per
/// session, no more.
pub struct CollectionNode<T> {
    core: Arc<NodeCore<Vec<Keyed<T>>>>,
    element_observers: Arc<ObserverList<ElementEvent<T>>>,
    session: Arc<SubscriptionSession>,
    session_handle: Mutex<Option<SubscriberHandle>>,
}

impl<T: Clone + Send + Sync + 'static> CollectionNode<T> {
    /// Wrap `session`, taking ownership of its lifecycle.
    pub fn new(session: Arc<SubscriptionSession>, decoder: impl Decoder<T> + 'static) -> Self {
        let core = NodeCore::new();
        let element_observers = Arc::new(ObserverList::new());
        let decoder: Arc<dyn Decoder<T>> = Arc::new(decoder);
        let elements: Arc<Mutex<Vec<Keyed<T>>>> = Arc::new(Mutex::new(Vec::new()));

        let handle = session.subscribe({
            let core = Arc::clone(&core);
            let element_observers = Arc::clone(&element_observers);
            let decoder = Arc::clone(&decoder);
            let elements = Arc::clone(&elements);
            move |event| {
                Self::apply(event, &core, &element_observers, &decoder, &elements);
            }
        });

        // Pick up elements the session already holds.
        if let SessionValue::List(raw) = session.value() {
            match decode_all(&decoder, &raw) {
                Ok(decoded) => {
                    *elements.lock() = decoded.clone();
                    core.seed(NodeState::Value(decoded));
                }
                Err(error) => core.seed(NodeState::Error(error)),
            }
        } else if let Some(error) = session.last_error() {
            core.seed(NodeState::Error(error));
        }

        Self {
            core,
            element_observers,
            session,
            session_handle: Mutex::new(Some(handle)),
        }
    }

    fn apply(
        event: &SessionEvent,
        core: &NodeCore<Vec<Keyed<T>>>,
        element_observers: &ObserverList<ElementEvent<T>>,
        decoder: &Arc<dyn Decoder<T>>,
        elements: &Mutex<Vec<Keyed<T>>>,
    ) {
        match event {
            SessionEvent::Refresh(raw) => match decode_all(decoder, raw) {
                Ok(decoded) => {
                    *elements.lock() = decoded.clone();
                    core.publish(NodeState::Value(decoded.clone()));
                    element_observers.emit(&ElementEvent::Refresh(decoded));
                }
                Err(error) => core.publish(NodeState::Error(error)),
            },
            SessionEvent::Insert(raw) | SessionEvent::Update(raw) => {
                let keyed = match decoder.decode(&raw.value) {
                    Ok(value) => Keyed::new(raw.key.clone(), value),
                    Err(error) => {
                        core.publish(NodeState::Error(error));
                        return;
                    }
                };
                let snapshot = {
                    let mut elements = elements.lock();
                    match elements.iter_mut().find(|e| e.key == keyed.key) {
                        Some(slot) => slot.value = keyed.value.clone(),
                        None => elements.push(keyed.clone()),
                    }
                    elements.clone()
                };
                core.publish(NodeState::Value(snapshot));
                let delta = match event {
                    SessionEvent::Insert(_) => ElementEvent::Insert(keyed),
                    _ => ElementEvent::Update(keyed),
                };
                element_observers.emit(&delta);
            }
            SessionEvent::Remove { key } => {
                let snapshot = {
                    let mut elements = elements.lock();
                    elements.retain(|e| &e.key != key);
                    elements.clone()
                };
                core.publish(NodeState::Value(snapshot));
                element_observers.emit(&ElementEvent::Remove { key: key.clone() });
            }
            SessionEvent::Error(error) => core.publish(NodeState::Error(error.clone())),
            // Object values never arrive on a list session.
            SessionEvent::Value(_) => {}
        }
    }

    /// Register a per-element observer.
    pub fn subscribe_elements(
        &self,
        observer: impl Fn(&ElementEvent<T>) + Send + Sync + 'static,
    ) -> SubscriberHandle {
        self.element_observers.subscribe(observer)
    }

    /// The wrapped session.
    #[must_use]
    pub fn session(&self) -> &Arc<SubscriptionSession> {
        &self.session
    }
}

fn decode_all<T>(
    decoder: &Arc<dyn Decoder<T>>,
    raw: &[Keyed<serde_json::Value>],
) -> Result<Vec<Keyed<T>>, SyncError> {
    raw.iter()
        .map(|element| {
            decoder
                .decode(&element.value)
                .map(|value| Keyed::new(element.key.clone(), value))
        })
        .collect()
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Node<Vec<Keyed<T>>> for CollectionNode<T> {
    fn current(&self) -> NodeState<Vec<Keyed<T>>> {
        self.core.current()
    }

    fn subscribe(&self, observer: Observer<Vec<Keyed<T>>>) -> SubscriberHandle {
        self.core.subscribe(observer)
    }

    async fn close(&self) {
        if let Some(handle) = self.session_handle.lock().take() {
            handle.unsubscribe();
        }
        if let Err(error) = self.session.close().await {
            warn!(id = %self.session.id(), error = %error, "session close degraded");
        }
        self.element_observers.clear();
        self.core.clear_observers();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
