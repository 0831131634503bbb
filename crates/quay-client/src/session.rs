//! Subscription sessions: the unit of server-pushed state.
//!
//! A session is created by a `watch_model` / `watch_list` request and keeps
//! that request's id. It applies the protocol's event semantics to maintain
//! one current value, notifies observers synchronously in registration
//! order, and performs the explicit unwatch handshake on close.
//!
//! An error never destroys a session: the error state is entered, observers
//! are told, and further pushes keep flowing. Only `close()` (or connection
//! teardown) is terminal.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use quay_core::observers::{ObserverList, SubscriberHandle};
use quay_core::{model, Keyed, SubscriptionId, SyncError};
use quay_wire::{Envelope, EnvelopeEvent, Request, UpdateBody, UpdateEvent};

use crate::wire::Wire;

/// What a session watches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionKind {
    /// A single entity; events are `update` and `delete`.
    Object,
    /// An entity-valued list or sub-document array; events are `refresh`,
    /// `insert`, `update`, and `delete`.
    List,
}

/// Session lifecycle.
///
/// The error state is a flag, not a lifecycle stage: it can be entered from
/// any non-terminal state and the session remains live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Registered, awaiting the first envelope.
    Open,
    /// Has (or had) a current value.
    Active,
    /// Unwatch sent, awaiting acknowledgement.
    Closing,
    /// Terminal.
    Closed,
}

/// Current value held by a session.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionValue {
    /// No value yet (or the entity was deleted).
    Unset,
    /// Object kind: the full current entity payload.
    Object(Value),
    /// List kind: the element sequence, in insertion order of the
    /// session's key map (stable per session).
    List(Vec<Keyed<Value>>),
}

/// One change notification delivered to session observers.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// Object kind: a new full value superseding the prior one.
    Value(Value),
    /// List kind: the whole element set was replaced.
    Refresh(Vec<Keyed<Value>>),
    /// List kind: one element inserted.
    Insert(Keyed<Value>),
    /// List kind: one element updated in place.
    Update(Keyed<Value>),
    /// List kind: one element removed.
    Remove {
        /// Key of the removed element.
        key: String,
    },
    /// The session entered the error state (entity deleted, server
    /// rejection, decode failure, or transport loss).
    Error(SyncError),
}

struct Inner {
    state: SessionState,
    value: SessionValue,
    last_error: Option<SyncError>,
}

/// A standing subscription to server-side model state.
pub struct SubscriptionSession {
    id: SubscriptionId,
    kind: SubscriptionKind,
    wire: Wire,
    inner: Mutex<Inner>,
    observers: ObserverList<SessionEvent>,
}

impl SubscriptionSession {
    pub(crate) fn new(id: SubscriptionId, kind: SubscriptionKind, wire: Wire) -> Arc<Self> {
        Arc::new(Self {
            id,
            kind,
            wire,
            inner: Mutex::new(Inner {
                state: SessionState::Open,
                value: SessionValue::Unset,
                last_error: None,
            }),
            observers: ObserverList::new(),
        })
    }

    /// A session with no connection behind it.
    ///
    /// Applies envelope semantics normally; `close()` resolves locally
    /// without a handshake. Useful for fixtures and offline previews.
    #[must_use]
    pub fn detached(kind: SubscriptionKind) -> Arc<Self> {
        Self::new(SubscriptionId::new(), kind, Wire::detached())
    }

    /// The subscription's correlation id.
    #[must_use]
    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    /// Object or list.
    #[must_use]
    pub fn kind(&self) -> SubscriptionKind {
        self.kind
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Current value (full, never a partial patch).
    #[must_use]
    pub fn value(&self) -> SessionValue {
        self.inner.lock().value.clone()
    }

    /// Most recent error, if the session is in the error state.
    #[must_use]
    pub fn last_error(&self) -> Option<SyncError> {
        self.inner.lock().last_error.clone()
    }

    /// Register an observer; notified synchronously, after all earlier
    /// registrants, on the task that delivers each envelope.
    pub fn subscribe(
        &self,
        observer: impl Fn(&SessionEvent) + Send + Sync + 'static,
    ) -> SubscriberHandle {
        self.observers.subscribe(observer)
    }

    /// Apply one inbound envelope correlated to this session.
    ///
    /// Called by the connection's dispatch loop; envelopes for one
    /// subscription id are applied in network-arrival order.
    pub fn apply_envelope(&self, envelope: &Envelope) {
        if self.state() == SessionState::Closed {
            debug!(id = %self.id, "envelope for a closed session dropped");
            return;
        }
        match envelope.event {
            EnvelopeEvent::Response => match envelope.response_body() {
                Ok(body) if body.success => {
                    debug!(id = %self.id, "watch acknowledged");
                }
                Ok(body) => self.enter_error(SyncError::Rejected {
                    message: "watch rejected".to_owned(),
                    data: body.data,
                }),
                Err(e) => self.enter_error(e),
            },
            EnvelopeEvent::Error => self.enter_error(envelope.rejection()),
            EnvelopeEvent::SocketClosed => {
                let error = match envelope.socket_closed_body() {
                    Ok(body) => SyncError::Transport {
                        reason: body.reason,
                        description: body.description,
                    },
                    Err(_) => SyncError::io("socket closed"),
                };
                self.fail(error);
            }
            EnvelopeEvent::Update => match envelope.update_body() {
                Ok(body) => match self.kind {
                    SubscriptionKind::Object => self.apply_object(body),
                    SubscriptionKind::List => self.apply_list(body),
                },
                Err(e) => self.enter_error(e),
            },
        }
    }

    fn apply_object(&self, body: UpdateBody) {
        match body.event {
            UpdateEvent::Update => {
                let Some(payload) = body.updated else {
                    self.enter_error(SyncError::decode("object update without payload"));
                    return;
                };
                {
                    let mut inner = self.inner.lock();
                    inner.state = SessionState::Active;
                    inner.value = SessionValue::Object(payload.clone());
                    inner.last_error = None;
                }
                self.observers.emit(&SessionEvent::Value(payload));
            }
            UpdateEvent::Delete => {
                // A vanished entity is a failure state for every downstream
                // consumer, not a valid (empty) value.
                let error = SyncError::EntityDeleted {
                    id: self.id.to_string(),
                };
                {
                    let mut inner = self.inner.lock();
                    inner.state = SessionState::Active;
                    inner.value = SessionValue::Unset;
                    inner.last_error = Some(error.clone());
                }
                self.observers.emit(&SessionEvent::Error(error));
            }
            UpdateEvent::Refresh | UpdateEvent::Insert => {
                self.enter_error(SyncError::decode(format!(
                    "list event {:?} on an object subscription",
                    body.event
                )));
            }
        }
    }

    fn apply_list(&self, body: UpdateBody) {
        match body.event {
            UpdateEvent::Refresh => {
                let Some(Value::Array(raw)) = body.updated else {
                    self.enter_error(SyncError::decode("refresh payload is not an array"));
                    return;
                };
                let mut elements = Vec::with_capacity(raw.len());
                for element in raw {
                    match model::split_key(element) {
                        Ok((key, value)) => elements.push(Keyed::new(key, value)),
                        Err(e) => {
                            self.enter_error(e);
                            return;
                        }
                    }
                }
                {
                    let mut inner = self.inner.lock();
                    inner.state = SessionState::Active;
                    inner.value = SessionValue::List(elements.clone());
                    inner.last_error = None;
                }
                self.observers.emit(&SessionEvent::Refresh(elements));
            }
            UpdateEvent::Insert | UpdateEvent::Update => {
                let Some(payload) = body.updated else {
                    self.enter_error(SyncError::decode("list element event without payload"));
                    return;
                };
                let keyed = match model::split_key(payload) {
                    Ok((key, value)) => Keyed::new(key, value),
                    Err(e) => {
                        self.enter_error(e);
                        return;
                    }
                };
                {
                    let mut inner = self.inner.lock();
                    inner.state = SessionState::Active;
                    let mut elements =
                        match std::mem::replace(&mut inner.value, SessionValue::Unset) {
                            SessionValue::List(elements) => elements,
                            _ => Vec::new(),
                        };
                    // Upsert by key: position kept on update, appended on
                    // first sight. Key uniqueness is the invariant.
                    match elements.iter_mut().find(|e| e.key == keyed.key) {
                        Some(slot) => slot.value = keyed.value.clone(),
                        None => elements.push(keyed.clone()),
                    }
                    inner.value = SessionValue::List(elements);
                    inner.last_error = None;
                }
                let event = match body.event {
                    UpdateEvent::Insert => SessionEvent::Insert(keyed),
                    _ => SessionEvent::Update(keyed),
                };
                self.observers.emit(&event);
            }
            UpdateEvent::Delete => {
                let key = match body.updated {
                    Some(Value::String(key)) => key,
                    Some(Value::Object(map)) => {
                        match map.get("dbId").or_else(|| map.get("_id")) {
                            Some(Value::String(key)) => key.clone(),
                            _ => {
                                self.enter_error(SyncError::decode(
                                    "list delete without a string key",
                                ));
                                return;
                            }
                        }
                    }
                    _ => {
                        self.enter_error(SyncError::decode("list delete without a key"));
                        return;
                    }
                };
                let removed = {
                    let mut inner = self.inner.lock();
                    inner.state = SessionState::Active;
                    match &mut inner.value {
                        SessionValue::List(elements) => {
                            let before = elements.len();
                            elements.retain(|e| e.key != key);
                            elements.len() != before
                        }
                        _ => false,
                    }
                };
                if removed {
                    self.observers.emit(&SessionEvent::Remove { key });
                } else {
                    debug!(id = %self.id, key = %key, "delete for unknown element key");
                }
            }
        }
    }

    /// Enter the error state and notify observers. The session stays live.
    fn enter_error(&self, error: SyncError) {
        {
            let mut inner = self.inner.lock();
            if inner.state == SessionState::Closed {
                return;
            }
            inner.last_error = Some(error.clone());
        }
        self.observers.emit(&SessionEvent::Error(error));
    }

    /// Terminal failure from connection teardown: error out, close, and
    /// release observers.
    pub(crate) fn fail(&self, error: SyncError) {
        {
            let mut inner = self.inner.lock();
            if inner.state == SessionState::Closed {
                return;
            }
            inner.state = SessionState::Closed;
            inner.last_error = Some(error.clone());
        }
        self.observers.emit(&SessionEvent::Error(error));
        self.observers.clear();
    }

    /// Close the subscription.
    ///
    /// Sends `unwatch_model` correlated by this session's own id and
    /// suspends until the server acknowledges. On an already-`Closing` or
    /// `Closed` session this is a no-op returning success. If the
    /// acknowledgement does not arrive within the configured timeout the
    /// session is forced to `Closed` locally and
    /// [`SyncError::UnwatchTimeout`] is returned.
    pub async fn close(&self) -> Result<(), SyncError> {
        {
            let mut inner = self.inner.lock();
            match inner.state {
                SessionState::Closing | SessionState::Closed => return Ok(()),
                SessionState::Open | SessionState::Active => {
                    inner.state = SessionState::Closing;
                }
            }
        }
        // Deregister first: pushes that race the unwatch become orphans and
        // are dropped by the dispatcher.
        let _ = self.wire.routes.remove(self.id.as_str());

        let request = Request::unwatch_model(&self.id);
        let unwatch_id = request.id.clone();
        let outcome =
            tokio::time::timeout(self.wire.unwatch_timeout, self.wire.send(request)).await;
        self.finish_close();
        match outcome {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => {
                // Connection already gone (or the server rejected the
                // unwatch): the session is closed locally either way.
                warn!(id = %self.id, error = %e, "unwatch not acknowledged; closed locally");
                Ok(())
            }
            Err(_) => {
                // Reclaim the reply slot so a dead server cannot leak it.
                let _ = self.wire.routes.remove(unwatch_id.as_str());
                warn!(id = %self.id, "unwatch acknowledgement timed out; closed locally");
                Err(SyncError::UnwatchTimeout {
                    id: self.id.to_string(),
                })
            }
        }
    }

    fn finish_close(&self) {
        self.inner.lock().state = SessionState::Closed;
        self.observers.clear();
    }
}

impl std::fmt::Debug for SubscriptionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SubscriptionSession")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &inner.state)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
