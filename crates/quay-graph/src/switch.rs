//! Value-dependent rewiring.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use quay_core::observers::SubscriberHandle;

use crate::node::{Node, NodeCore, NodeState, Observer};

/// Builds a downstream node from each selector value.
pub type NodeFactory<S, T> = dyn Fn(&S) -> Box<dyn Node<T>> + Send + Sync;

struct ActiveChild<T> {
    /// Monotonic swap counter; a child's events only land while its
    /// generation is current, so a node being closed in the background can
    /// never publish a stale value.
    generation: u64,
    node: Option<Arc<dyn Node<T>>>,
    handle: Option<SubscriberHandle>,
}

/// Owns a selector node whose value constructs the real downstream node.
///
/// On each new selector value the factory builds a fresh downstream node;
/// only after it exists and is subscribed does the previous one begin
/// closing, in the background, so observers never see a transient unset
/// gap. `close()` waits for the selector, the live child, and every
/// background close.
pub struct SwitchNode<S, T> {
    core: Arc<NodeCore<T>>,
    selector: Box<dyn Node<S>>,
    selector_handle: Mutex<Option<SubscriberHandle>>,
    active: Arc<Mutex<ActiveChild<T>>>,
    pending_closes: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl<S, T> SwitchNode<S, T>
where
    S: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Take ownership of `selector` and rewire through `factory`.
    pub fn new(
        selector: Box<dyn Node<S>>,
        factory: impl Fn(&S) -> Box<dyn Node<T>> + Send + Sync + 'static,
    ) -> Self {
        let core = NodeCore::new();
        let factory: Arc<NodeFactory<S, T>> = Arc::new(factory);
        let active = Arc::new(Mutex::new(ActiveChild {
            generation: 0,
            node: None,
            handle: None,
        }));
        let pending_closes = Arc::new(Mutex::new(Vec::new()));

        let handle = selector.subscribe(Box::new({
            let core = Arc::clone(&core);
            let factory = Arc::clone(&factory);
            let active = Arc::clone(&active);
            let pending_closes = Arc::clone(&pending_closes);
            move |state| match state {
                NodeState::Value(value) => {
                    rewire(value, &core, &factory, &active, &pending_closes);
                }
                NodeState::Error(error) => core.publish(NodeState::Error(error.clone())),
                NodeState::Unset => {}
            }
        }));

        // A selector that already has a value wires the first child now.
        match selector.current() {
            NodeState::Value(value) => {
                rewire(&value, &core, &factory, &active, &pending_closes);
            }
            NodeState::Error(error) => core.publish(NodeState::Error(error)),
            NodeState::Unset => {}
        }

        Self {
            core,
            selector,
            selector_handle: Mutex::new(Some(handle)),
            active,
            pending_closes,
        }
    }
}

/// Create the replacement child, then retire the previous one.
fn rewire<S, T>(
    value: &S,
    core: &Arc<NodeCore<T>>,
    factory: &Arc<NodeFactory<S, T>>,
    active: &Arc<Mutex<ActiveChild<T>>>,
    pending_closes: &Arc<Mutex<Vec<JoinHandle<()>>>>,
) where
    T: Clone + Send + Sync + 'static,
{
    let new_node: Arc<dyn Node<T>> = Arc::from(factory(value));
    let generation = {
        let mut guard = active.lock();
        guard.generation += 1;
        guard.generation
    };

    let handle = new_node.subscribe(Box::new({
        let core = Arc::clone(core);
        let active = Arc::clone(active);
        move |state| {
            if state.is_unset() {
                return;
            }
            if active.lock().generation == generation {
                core.publish(state.clone());
            }
        }
    }));

    // Forward a value the new child produced before we subscribed.
    let initial = new_node.current();
    if !initial.is_unset() && active.lock().generation == generation {
        core.publish(initial);
    }

    // Only now that the replacement exists does the old child retire; its
    // close runs in the background and is awaited by this node's close().
    let previous = {
        let mut guard = active.lock();
        let previous = (guard.node.take(), guard.handle.take());
        guard.node = Some(new_node);
        guard.handle = Some(handle);
        previous
    };
    if let Some(handle) = previous.1 {
        handle.unsubscribe();
    }
    if let Some(old_node) = previous.0 {
        let close = tokio::spawn(async move { old_node.close().await });
        pending_closes.lock().push(close);
    }
}

#[async_trait]
impl<S, T> Node<T> for SwitchNode<S, T>
where
    S: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn current(&self) -> NodeState<T> {
        self.core.current()
    }

    fn subscribe(&self, observer: Observer<T>) -> SubscriberHandle {
        self.core.subscribe(observer)
    }

    async fn close(&self) {
        if let Some(handle) = self.selector_handle.lock().take() {
            handle.unsubscribe();
        }
        let (child, handle) = {
            let mut guard = self.active.lock();
            (guard.node.take(), guard.handle.take())
        };
        if let Some(handle) = handle {
            handle.unsubscribe();
        }
        let child_close = async {
            if let Some(child) = child {
                child.close().await;
            }
        };
        let _ = futures::join!(self.selector.close(), child_close);
        // No background close may outlive its owner.
        let pending: Vec<JoinHandle<()>> = std::mem::take(&mut *self.pending_closes.lock());
        let _ = join_all(pending).await;
        self.core.clear_observers();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
