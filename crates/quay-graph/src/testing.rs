//! Scripted fake nodes for combinator tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use quay_core::SyncError;
use quay_core::observers::SubscriberHandle;

use crate::node::{Node, NodeCore, NodeState, Observer};

/// A hand-driven upstream node.
///
/// Clones share state: tests keep one clone to push values while the
/// combinator under test owns another.
pub(crate) struct ScriptNode<T> {
    core: Arc<NodeCore<T>>,
    close_count: Arc<AtomicUsize>,
}

impl<T: Clone + Send + Sync + 'static> ScriptNode<T> {
    pub(crate) fn new() -> Self {
        Self {
            core: NodeCore::new(),
            close_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn push(&self, value: T) {
        self.core.publish(NodeState::Value(value));
    }

    pub(crate) fn push_error(&self, error: SyncError) {
        self.core.publish(NodeState::Error(error));
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.close_count.load(Ordering::SeqCst) > 0
    }

    pub(crate) fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }
}

impl<T> Clone for ScriptNode<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            close_count: Arc::clone(&self.close_count),
        }
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Node<T> for ScriptNode<T> {
    fn current(&self) -> NodeState<T> {
        self.core.current()
    }

    fn subscribe(&self, observer: Observer<T>) -> SubscriberHandle {
        self.core.subscribe(observer)
    }

    async fn close(&self) {
        let _ = self.close_count.fetch_add(1, Ordering::SeqCst);
        self.core.clear_observers();
    }
}

/// Spin until `check` holds; panics after a bounded wait. Background
/// closes run on spawned tasks, so assertions about them need a hop.
pub(crate) async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    panic!("condition not reached in time");
}
