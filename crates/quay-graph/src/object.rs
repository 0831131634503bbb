//! Leaf node over an object subscription.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::warn;

use quay_client::{SessionEvent, SessionValue, SubscriptionSession};
use quay_core::Decoder;
use quay_core::observers::SubscriberHandle;

use crate::node::{Node, NodeCore, NodeState, Observer};

/// Wraps one object-kind [`SubscriptionSession`], decoding each pushed
/// payload with an injected [`Decoder`]. Values and errors pass through 1:1;
/// an entity deletion arrives as the distinguished
/// [`quay_core::SyncError::EntityDeleted`] state.
pub struct ObjectNode<T> {
    core: Arc<NodeCore<T>>,
    session: Arc<SubscriptionSession>,
    session_handle: Mutex<Option<SubscriberHandle>>,
}

impl<T: Clone + Send + Sync + 'static> ObjectNode<T> {
    /// Wrap `session`, taking ownership of its lifecycle.
    pub fn new(session: Arc<SubscriptionSession>, decoder: impl Decoder<T> + 'static) -> Self {
        let core = NodeCore::new();
        let decoder: Arc<dyn Decoder<T>> = Arc::new(decoder);

        let handle = session.subscribe({
            let core = Arc::clone(&core);
            let decoder = Arc::clone(&decoder);
            move |event| match event {
                SessionEvent::Value(payload) => core.publish(match decoder.decode(payload) {
                    Ok(value) => NodeState::Value(value),
                    Err(error) => NodeState::Error(error),
                }),
                SessionEvent::Error(error) => core.publish(NodeState::Error(error.clone())),
                // List deltas never arrive on an object session.
                _ => {}
            }
        });

        // Pick up a value the session already holds.
        if let SessionValue::Object(payload) = session.value() {
            core.seed(match decoder.decode(&payload) {
                Ok(value) => NodeState::Value(value),
                Err(error) => NodeState::Error(error),
            });
        } else if let Some(error) = session.last_error() {
            core.seed(NodeState::Error(error));
        }

        Self {
            core,
            session,
            session_handle: Mutex::new(Some(handle)),
        }
    }

    /// The wrapped session.
    #[must_use]
    pub fn session(&self) -> &Arc<SubscriptionSession> {
        &self.session
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Node<T> for ObjectNode<T> {
    fn current(&self) -> NodeState<T> {
        self.core.current()
    }

    fn subscribe(&self, observer: Observer<T>) -> SubscriberHandle {
        self.core.subscribe(observer)
    }

    async fn close(&self) {
        if let Some(handle) = self.session_handle.lock().take() {
            handle.unsubscribe();
        }
        if let Err(error) = self.session.close().await {
            warn!(id = %self.session.id(), error = %error, "session close degraded");
        }
        self.core.clear_observers();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use quay_client::{SessionState, SubscriptionKind};
    use quay_core::{JsonDecoder, SyncError};
    use quay_wire::{Envelope, EnvelopeEvent};
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Clone, Debug, Deserialize, PartialEq)]
    struct Product {
        name: String,
        price: f64,
    }

    fn push_update(session: &SubscriptionSession, message: serde_json::Value) {
        session.apply_envelope(&Envelope {
            id: session.id().to_string(),
            event: EnvelopeEvent::Update,
            message,
        });
    }

    fn product_node() -> (Arc<SubscriptionSession>, ObjectNode<Product>) {
        let session = SubscriptionSession::detached(SubscriptionKind::Object);
        let node = ObjectNode::new(Arc::clone(&session), JsonDecoder::<Product>::new());
        (session, node)
    }

    #[test]
    fn decodes_pushed_value() {
        let (session, node) = product_node();
        assert!(node.current().is_unset());

        push_update(
            &session,
            json!({"event": "update", "updated": {"name": "Mug", "price": 9.5, "dbId": "P1"}}),
        );
        assert_eq!(
            node.current().value(),
            Some(&Product {
                name: "Mug".into(),
                price: 9.5
            })
        );
    }

    #[test]
    fn notifies_observers_per_value() {
        let (session, node) = product_node();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _handle = node.subscribe(Box::new(move |state| sink.lock().push(state.clone())));

        push_update(&session, json!({"event": "update", "updated": {"name": "A", "price": 1.0}}));
        push_update(&session, json!({"event": "update", "updated": {"name": "B", "price": 2.0}}));

        let states = seen.lock();
        assert_eq!(states.len(), 2);
        assert_eq!(states[1].value().unwrap().name, "B");
    }

    #[test]
    fn deletion_surfaces_distinguished_error() {
        let (session, node) = product_node();
        push_update(&session, json!({"event": "update", "updated": {"name": "Mug", "price": 9.5}}));
        push_update(&session, json!({"event": "delete"}));

        let state = node.current();
        assert!(state.error().unwrap().is_entity_deleted());
    }

    #[test]
    fn decode_failure_is_node_error() {
        let (session, node) = product_node();
        push_update(&session, json!({"event": "update", "updated": {"name": "Mug"}}));
        match node.current() {
            NodeState::Error(SyncError::Decode { detail, .. }) => {
                assert!(detail.contains("price"));
            }
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[test]
    fn decode_failure_does_not_stick() {
        let (session, node) = product_node();
        push_update(&session, json!({"event": "update", "updated": {"bogus": 1}}));
        assert!(node.current().error().is_some());
        push_update(&session, json!({"event": "update", "updated": {"name": "Mug", "price": 9.5}}));
        assert!(node.current().value().is_some());
    }

    #[test]
    fn seeds_from_already_active_session() {
        let session = SubscriptionSession::detached(SubscriptionKind::Object);
        push_update(&session, json!({"event": "update", "updated": {"name": "Mug", "price": 9.5}}));
        let node = ObjectNode::new(Arc::clone(&session), JsonDecoder::<Product>::new());
        assert_eq!(node.current().value().unwrap().name, "Mug");
    }

    #[tokio::test]
    async fn close_closes_the_session() {
        let (session, node) = product_node();
        node.close().await;
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn double_close_is_idempotent() {
        let (_session, node) = product_node();
        node.close().await;
        node.close().await;
    }

    #[tokio::test]
    async fn no_notifications_after_close() {
        let (session, node) = product_node();
        let seen = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&seen);
        let _handle = node.subscribe(Box::new(move |_| *sink.lock() += 1));
        node.close().await;
        push_update(&session, json!({"event": "update", "updated": {"name": "X", "price": 0.0}}));
        assert_eq!(*seen.lock(), 0);
    }
}
