//! One-shot "current state, then disconnect" semantics.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use quay_core::observers::SubscriberHandle;

use crate::node::{Node, NodeCore, NodeState, Observer};

struct Upstream<T> {
    node: Option<Arc<dyn Node<T>>>,
    handle: Option<SubscriberHandle>,
    fired: bool,
}

/// Forwards only the first value its upstream ever produces, then
/// immediately closes the upstream in the background (awaited by this
/// node's own `close()`). Errors before the first value pass through
/// without consuming the shot. Explicit `close()` before any value is
/// safe.
pub struct SnapshotNode<T> {
    core: Arc<NodeCore<T>>,
    upstream: Arc<Mutex<Upstream<T>>>,
    pending_close: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<T: Clone + Send + Sync + 'static> SnapshotNode<T> {
    /// Take ownership of `upstream` for a single-value read.
    pub fn new(upstream: Box<dyn Node<T>>) -> Self {
        let core = NodeCore::new();
        let upstream: Arc<dyn Node<T>> = Arc::from(upstream);
        let shared = Arc::new(Mutex::new(Upstream {
            node: Some(Arc::clone(&upstream)),
            handle: None,
            fired: false,
        }));
        let pending_close = Arc::new(Mutex::new(None));

        let handle = upstream.subscribe(Box::new({
            let core = Arc::clone(&core);
            let shared = Arc::clone(&shared);
            let pending_close = Arc::clone(&pending_close);
            move |state| match state {
                NodeState::Value(_) => {
                    let retired = {
                        let mut upstream = shared.lock();
                        if upstream.fired {
                            None
                        } else {
                            upstream.fired = true;
                            upstream.node.take()
                        }
                    };
                    if let Some(node) = retired {
                        core.publish(state.clone());
                        let close = tokio::spawn(async move { node.close().await });
                        *pending_close.lock() = Some(close);
                    }
                }
                NodeState::Error(error) => {
                    if !shared.lock().fired {
                        core.publish(NodeState::Error(error.clone()));
                    }
                }
                NodeState::Unset => {}
            }
        }));
        shared.lock().handle = Some(handle);

        // An upstream that already has a value satisfies the shot now.
        match upstream.current() {
            NodeState::Value(value) => {
                let retired = {
                    let mut guard = shared.lock();
                    if guard.fired {
                        None
                    } else {
                        guard.fired = true;
                        guard.node.take()
                    }
                };
                if let Some(node) = retired {
                    if let Some(handle) = shared.lock().handle.take() {
                        handle.unsubscribe();
                    }
                    core.publish(NodeState::Value(value));
                    let close = tokio::spawn(async move { node.close().await });
                    *pending_close.lock() = Some(close);
                }
            }
            NodeState::Error(error) => core.publish(NodeState::Error(error)),
            NodeState::Unset => {}
        }

        Self {
            core,
            upstream: shared,
            pending_close,
        }
    }

    /// Whether the single value has been delivered.
    #[must_use]
    pub fn fired(&self) -> bool {
        self.upstream.lock().fired
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Node<T> for SnapshotNode<T> {
    fn current(&self) -> NodeState<T> {
        self.core.current()
    }

    fn subscribe(&self, observer: Observer<T>) -> SubscriberHandle {
        self.core.subscribe(observer)
    }

    async fn close(&self) {
        let (node, handle) = {
            let mut upstream = self.upstream.lock();
            (upstream.node.take(), upstream.handle.take())
        };
        if let Some(handle) = handle {
            handle.unsubscribe();
        }
        if let Some(node) = node {
            node.close().await;
        }
        let pending = self.pending_close.lock().take();
        if let Some(pending) = pending {
            let _ = pending.await;
        }
        self.core.clear_observers();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
