//! Pure synchronous value transform.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use quay_core::observers::SubscriberHandle;

use crate::node::{Node, NodeCore, NodeState, Observer};

/// Applies a pure function to every value passing through an owned
/// upstream. Opens no subscriptions of its own; errors pass through
/// untouched and closing delegates to the upstream.
pub struct MapNode<T, U> {
    core: Arc<NodeCore<U>>,
    upstream: Box<dyn Node<T>>,
    upstream_handle: Mutex<Option<SubscriberHandle>>,
}

impl<T, U> MapNode<T, U>
where
    T: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
{
    /// Take ownership of `upstream` and project through `transform`.
    pub fn new(
        upstream: Box<dyn Node<T>>,
        transform: impl Fn(&T) -> U + Send + Sync + 'static,
    ) -> Self {
        let core = NodeCore::new();
        let transform = Arc::new(transform);

        let handle = upstream.subscribe(Box::new({
            let core = Arc::clone(&core);
            let transform = Arc::clone(&transform);
            move |state| match state {
                NodeState::Value(value) => core.publish(NodeState::Value(transform(value))),
                NodeState::Error(error) => core.publish(NodeState::Error(error.clone())),
                NodeState::Unset => {}
            }
        }));

        match upstream.current() {
            NodeState::Value(value) => core.seed(NodeState::Value(transform(&value))),
            NodeState::Error(error) => core.seed(NodeState::Error(error)),
            NodeState::Unset => {}
        }

        Self {
            core,
            upstream,
            upstream_handle: Mutex::new(Some(handle)),
        }
    }
}

#[async_trait]
impl<T, U> Node<U> for MapNode<T, U>
where
    T: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
{
    fn current(&self) -> NodeState<U> {
        self.core.current()
    }

    fn subscribe(&self, observer: Observer<U>) -> SubscriberHandle {
        self.core.subscribe(observer)
    }

    async fn close(&self) {
        if let Some(handle) = self.upstream_handle.lock().take() {
            handle.unsubscribe();
        }
        self.upstream.close().await;
        self.core.clear_observers();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptNode;
    use quay_core::SyncError;

    #[test]
    fn transforms_each_value() {
        let upstream: ScriptNode<i32> = ScriptNode::new();
        let node = MapNode::new(Box::new(upstream.clone()), |n| n * 2);
        upstream.push(3);
        assert_eq!(node.current().value(), Some(&6));
        upstream.push(5);
        assert_eq!(node.current().value(), Some(&10));
    }

    #[test]
    fn errors_pass_through() {
        let upstream: ScriptNode<i32> = ScriptNode::new();
        let node = MapNode::new(Box::new(upstream.clone()), |n| n * 2);
        upstream.push_error(SyncError::Closed);
        assert_eq!(node.current().error(), Some(&SyncError::Closed));
    }

    #[test]
    fn seeds_from_existing_upstream_value() {
        let upstream: ScriptNode<i32> = ScriptNode::new();
        upstream.push(4);
        let node = MapNode::new(Box::new(upstream.clone()), |n| n + 1);
        assert_eq!(node.current().value(), Some(&5));
    }

    #[test]
    fn type_changing_projection() {
        let upstream: ScriptNode<i32> = ScriptNode::new();
        let node = MapNode::new(Box::new(upstream.clone()), |n| format!("#{n}"));
        upstream.push(7);
        assert_eq!(node.current().value().map(String::as_str), Some("#7"));
    }

    #[tokio::test]
    async fn close_delegates_to_upstream() {
        let upstream: ScriptNode<i32> = ScriptNode::new();
        let node = MapNode::new(Box::new(upstream.clone()), |n| *n);
        node.close().await;
        node.close().await;
        assert!(upstream.is_closed());
    }

    #[test]
    fn observers_see_mapped_values() {
        let upstream: ScriptNode<i32> = ScriptNode::new();
        let node = MapNode::new(Box::new(upstream.clone()), |n| n * 10);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _handle = node.subscribe(Box::new(move |state| {
            if let Some(v) = state.value() {
                sink.lock().push(*v);
            }
        }));
        upstream.push(1);
        upstream.push(2);
        assert_eq!(*seen.lock(), vec![10, 20]);
    }
}
