//! Pairwise merge of two upstream nodes.

use std::sync::Arc;

use async_trait::async_trait;
use futures::join;
use parking_lot::Mutex;

use quay_core::observers::SubscriberHandle;

use crate::node::{Node, NodeCore, NodeState, Observer};

struct Latest<A, B> {
    a: Option<A>,
    b: Option<B>,
}

/// Merges the latest values of two owned upstreams.
///
/// Emits nothing until *both* sides have produced at least one value; from
/// then on re-emits the pair whenever either side updates, using the
/// other's last-known value. An error from either side surfaces
/// immediately and clears that side's readiness, so the next combined
/// emission waits for a fresh value from the failed side.
pub struct CombineNode<A, B> {
    core: Arc<NodeCore<(A, B)>>,
    a: Box<dyn Node<A>>,
    b: Box<dyn Node<B>>,
    handles: Mutex<Vec<SubscriberHandle>>,
}

impl<A, B> CombineNode<A, B>
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
{
    /// Take ownership of both upstreams and start combining.
    pub fn new(a: Box<dyn Node<A>>, b: Box<dyn Node<B>>) -> Self {
        let core = NodeCore::new();
        let latest = Arc::new(Mutex::new(Latest { a: None, b: None }));

        let handle_a = a.subscribe(Box::new({
            let core = Arc::clone(&core);
            let latest = Arc::clone(&latest);
            move |state| match state {
                NodeState::Value(value) => {
                    let pair = {
                        let mut latest = latest.lock();
                        latest.a = Some(value.clone());
                        latest.b.as_ref().map(|b: &B| (value.clone(), b.clone()))
                    };
                    if let Some(pair) = pair {
                        core.publish(NodeState::Value(pair));
                    }
                }
                NodeState::Error(error) => {
                    latest.lock().a = None;
                    core.publish(NodeState::Error(error.clone()));
                }
                NodeState::Unset => {}
            }
        }));
        let handle_b = b.subscribe(Box::new({
            let core = Arc::clone(&core);
            let latest = Arc::clone(&latest);
            move |state| match state {
                NodeState::Value(value) => {
                    let pair = {
                        let mut latest = latest.lock();
                        latest.b = Some(value.clone());
                        latest.a.as_ref().map(|a| (a.clone(), value.clone()))
                    };
                    if let Some(pair) = pair {
                        core.publish(NodeState::Value(pair));
                    }
                }
                NodeState::Error(error) => {
                    latest.lock().b = None;
                    core.publish(NodeState::Error(error.clone()));
                }
                NodeState::Unset => {}
            }
        }));

        // Pick up values the upstreams already hold. No observers exist
        // yet, so publishing here only seeds the state.
        match (a.current(), b.current()) {
            (NodeState::Error(error), _) | (_, NodeState::Error(error)) => {
                core.publish(NodeState::Error(error));
            }
            (NodeState::Value(va), NodeState::Value(vb)) => {
                let mut guard = latest.lock();
                guard.a = Some(va.clone());
                guard.b = Some(vb.clone());
                drop(guard);
                core.publish(NodeState::Value((va, vb)));
            }
            (NodeState::Value(va), NodeState::Unset) => latest.lock().a = Some(va),
            (NodeState::Unset, NodeState::Value(vb)) => latest.lock().b = Some(vb),
            (NodeState::Unset, NodeState::Unset) => {}
        }

        Self {
            core,
            a,
            b,
            handles: Mutex::new(vec![handle_a, handle_b]),
        }
    }
}

#[async_trait]
impl<A, B> Node<(A, B)> for CombineNode<A, B>
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
{
    fn current(&self) -> NodeState<(A, B)> {
        self.core.current()
    }

    fn subscribe(&self, observer: Observer<(A, B)>) -> SubscriberHandle {
        self.core.subscribe(observer)
    }

    async fn close(&self) {
        for handle in self.handles.lock().drain(..) {
            handle.unsubscribe();
        }
        // Both upstreams close concurrently; resolve only when both have.
        let _ = join!(self.a.close(), self.b.close());
        self.core.clear_observers();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
