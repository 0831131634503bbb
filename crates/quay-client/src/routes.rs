//! Correlation-id routing table.
//!
//! The one piece of state shared between the reader task and callers: a map
//! from outstanding correlation id to either a one-shot reply slot or a
//! subscription session. All mutation goes through one mutex; entries are
//! inserted *before* the request bytes are enqueued so a fast reply can
//! never race an unregistered id.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use quay_core::SyncError;

use crate::session::SubscriptionSession;

/// Reply slot for a one-shot request.
pub(crate) type ReplySlot = oneshot::Sender<Result<Value, SyncError>>;

/// What an inbound envelope id can resolve to.
pub(crate) enum Route {
    /// A pending `send` awaiting exactly one reply.
    OneShot(ReplySlot),
    /// A standing subscription receiving any number of pushes.
    Subscription(Arc<SubscriptionSession>),
}

/// The connection's routing table.
#[derive(Clone, Default)]
pub(crate) struct RouteTable {
    routes: Arc<Mutex<HashMap<String, Route>>>,
}

impl RouteTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a one-shot reply slot under `id`.
    pub(crate) fn insert_one_shot(&self, id: &str, slot: ReplySlot) {
        let _ = self.routes.lock().insert(id.to_owned(), Route::OneShot(slot));
    }

    /// Register a subscription session under its id.
    pub(crate) fn insert_subscription(&self, id: &str, session: Arc<SubscriptionSession>) {
        let _ = self
            .routes
            .lock()
            .insert(id.to_owned(), Route::Subscription(session));
    }

    /// Remove and return whatever is registered under `id`.
    pub(crate) fn remove(&self, id: &str) -> Option<Route> {
        self.routes.lock().remove(id)
    }

    /// Take the one-shot slot for `id`, if that is what is registered.
    ///
    /// Leaves subscription routes in place: a one-shot fires exactly once,
    /// a subscription fires many times.
    pub(crate) fn take_one_shot(&self, id: &str) -> Option<ReplySlot> {
        let mut routes = self.routes.lock();
        match routes.get(id) {
            Some(Route::OneShot(_)) => match routes.remove(id) {
                Some(Route::OneShot(slot)) => Some(slot),
                _ => None,
            },
            _ => None,
        }
    }

    /// The subscription registered under `id`, if any.
    pub(crate) fn subscription(&self, id: &str) -> Option<Arc<SubscriptionSession>> {
        match self.routes.lock().get(id) {
            Some(Route::Subscription(session)) => Some(Arc::clone(session)),
            _ => None,
        }
    }

    /// Drain every route, delivering `error` to each.
    ///
    /// Used on transport teardown: every pending request resolves with the
    /// error and every live session enters the error state and closes.
    pub(crate) fn fail_all(&self, error: &SyncError) {
        let drained: Vec<(String, Route)> = self.routes.lock().drain().collect();
        for (id, route) in drained {
            debug!(id = %id, code = error.code(), "failing route on teardown");
            match route {
                Route::OneShot(slot) => {
                    let _ = slot.send(Err(error.clone()));
                }
                Route::Subscription(session) => session.fail(error.clone()),
            }
        }
    }

    /// Number of outstanding routes.
    pub(crate) fn len(&self) -> usize {
        self.routes.lock().len()
    }
}
