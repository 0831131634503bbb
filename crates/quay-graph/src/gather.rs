//! One child node per id in a dynamic id sequence.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use quay_core::observers::SubscriberHandle;

use crate::node::{Node, NodeCore, NodeState, Observer};

/// Builds the child node for one id.
pub type ChildFactory<T> = dyn Fn(&str) -> Box<dyn Node<T>> + Send + Sync;

struct ChildSlot<T> {
    node: Arc<dyn Node<T>>,
    handle: Option<SubscriberHandle>,
    /// Distinguishes this child from an earlier one under the same id
    /// (removed by one refresh, re-added by a later one).
    epoch: u64,
    last: Option<T>,
}

struct ChildSet<T> {
    order: Vec<String>,
    slots: HashMap<String, ChildSlot<T>>,
    next_epoch: u64,
}

impl<T: Clone> ChildSet<T> {
    /// The aggregate, in id order, once every tracked child has a value.
    fn aggregate_if_ready(&self) -> Option<Vec<T>> {
        self.order
            .iter()
            .map(|id| self.slots.get(id).and_then(|slot| slot.last.clone()))
            .collect()
    }
}

/// Owns an id-source node and a factory, maintaining one live child node
/// per currently-referenced id.
///
/// Reconciliation is by set difference: ids that survive a refresh keep
/// their children untouched, new ids get children, dropped ids have theirs
/// closed in the background. The aggregate emits only once every tracked
/// child has produced at least one value, then re-emits on any child
/// update. `close()` closes the source and all children concurrently and
/// waits for every background close.
pub struct GatherNode<T> {
    core: Arc<NodeCore<Vec<T>>>,
    source: Box<dyn Node<Vec<String>>>,
    source_handle: Mutex<Option<SubscriberHandle>>,
    children: Arc<Mutex<ChildSet<T>>>,
    pending_closes: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl<T: Clone + Send + Sync + 'static> GatherNode<T> {
    /// Take ownership of `source` and spread over `factory`.
    pub fn new(
        source: Box<dyn Node<Vec<String>>>,
        factory: impl Fn(&str) -> Box<dyn Node<T>> + Send + Sync + 'static,
    ) -> Self {
        let core = NodeCore::new();
        let factory: Arc<ChildFactory<T>> = Arc::new(factory);
        let children = Arc::new(Mutex::new(ChildSet {
            order: Vec::new(),
            slots: HashMap::new(),
            next_epoch: 0,
        }));
        let pending_closes = Arc::new(Mutex::new(Vec::new()));

        let handle = source.subscribe(Box::new({
            let core = Arc::clone(&core);
            let factory = Arc::clone(&factory);
            let children = Arc::clone(&children);
            let pending_closes = Arc::clone(&pending_closes);
            move |state| match state {
                NodeState::Value(ids) => {
                    reconcile(ids, &core, &factory, &children, &pending_closes);
                }
                NodeState::Error(error) => core.publish(NodeState::Error(error.clone())),
                NodeState::Unset => {}
            }
        }));

        // An id source that already has a value wires children now.
        match source.current() {
            NodeState::Value(ids) => reconcile(&ids, &core, &factory, &children, &pending_closes),
            NodeState::Error(error) => core.publish(NodeState::Error(error)),
            NodeState::Unset => {}
        }

        Self {
            core,
            source,
            source_handle: Mutex::new(Some(handle)),
            children,
            pending_closes,
        }
    }

    /// Ids currently tracked, in source order.
    #[must_use]
    pub fn tracked_ids(&self) -> Vec<String> {
        self.children.lock().order.clone()
    }
}

/// Apply one id sequence by set difference.
fn reconcile<T: Clone + Send + Sync + 'static>(
    ids: &[String],
    core: &Arc<NodeCore<Vec<T>>>,
    factory: &Arc<ChildFactory<T>>,
    children: &Arc<Mutex<ChildSet<T>>>,
    pending_closes: &Arc<Mutex<Vec<JoinHandle<()>>>>,
) {
    let (removed, added) = {
        let mut set = children.lock();
        set.order = ids.to_vec();
        let stale: Vec<String> = set
            .slots
            .keys()
            .filter(|key| !ids.contains(*key))
            .cloned()
            .collect();
        let removed: Vec<ChildSlot<T>> = stale
            .iter()
            .filter_map(|key| set.slots.remove(key))
            .collect();
        let added: Vec<String> = ids
            .iter()
            .filter(|id| !set.slots.contains_key(*id))
            .cloned()
            .collect();
        (removed, added)
    };
    debug!(added = added.len(), removed = removed.len(), "reconciling children");

    for mut slot in removed {
        if let Some(handle) = slot.handle.take() {
            handle.unsubscribe();
        }
        let node = slot.node;
        let close = tokio::spawn(async move { node.close().await });
        pending_closes.lock().push(close);
    }

    for id in added {
        let node: Arc<dyn Node<T>> = Arc::from(factory(&id));
        let epoch = {
            let mut set = children.lock();
            set.next_epoch += 1;
            set.next_epoch
        };

        let handle = node.subscribe(Box::new({
            let id = id.clone();
            let core = Arc::clone(core);
            let children = Arc::clone(children);
            move |state| match state {
                NodeState::Value(value) => {
                    let ready = {
                        let mut set = children.lock();
                        let Some(slot) = set.slots.get_mut(&id) else {
                            return;
                        };
                        if slot.epoch != epoch {
                            return;
                        }
                        slot.last = Some(value.clone());
                        set.aggregate_if_ready()
                    };
                    if let Some(aggregate) = ready {
                        core.publish(NodeState::Value(aggregate));
                    }
                }
                NodeState::Error(error) => {
                    let live = {
                        let set = children.lock();
                        set.slots.get(&id).is_some_and(|slot| slot.epoch == epoch)
                    };
                    if live {
                        core.publish(NodeState::Error(error.clone()));
                    }
                }
                NodeState::Unset => {}
            }
        }));

        let initial = node.current();
        {
            let mut set = children.lock();
            let last = match &initial {
                NodeState::Value(value) => Some(value.clone()),
                _ => None,
            };
            let _ = set.slots.insert(
                id.clone(),
                ChildSlot {
                    node,
                    handle: Some(handle),
                    epoch,
                    last,
                },
            );
        }
        if let NodeState::Error(error) = initial {
            core.publish(NodeState::Error(error));
        }
    }

    // Membership changed; emit the new aggregate as soon as it is whole.
    let ready = children.lock().aggregate_if_ready();
    if let Some(aggregate) = ready {
        core.publish(NodeState::Value(aggregate));
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Node<Vec<T>> for GatherNode<T> {
    fn current(&self) -> NodeState<Vec<T>> {
        self.core.current()
    }

    fn subscribe(&self, observer: Observer<Vec<T>>) -> SubscriberHandle {
        self.core.subscribe(observer)
    }

    async fn close(&self) {
        if let Some(handle) = self.source_handle.lock().take() {
            handle.unsubscribe();
        }
        let nodes: Vec<Arc<dyn Node<T>>> = {
            let mut set = self.children.lock();
            set.order.clear();
            set.slots
                .drain()
                .map(|(_, mut slot)| {
                    if let Some(handle) = slot.handle.take() {
                        handle.unsubscribe();
                    }
                    slot.node
                })
                .collect()
        };
        let child_closes = join_all(nodes.into_iter().map(|node| async move {
            node.close().await;
        }));
        let _ = futures::join!(self.source.close(), child_closes);
        let pending: Vec<JoinHandle<()>> = std::mem::take(&mut *self.pending_closes.lock());
        let _ = join_all(pending).await;
        self.core.clear_observers();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptNode, eventually};
    use quay_core::SyncError;

    struct Rig {
        source: ScriptNode<Vec<String>>,
        children: HashMap<String, ScriptNode<i64>>,
        created: Arc<Mutex<Vec<String>>>,
        node: GatherNode<i64>,
    }

    fn rig(keys: &[&str]) -> Rig {
        let source: ScriptNode<Vec<String>> = ScriptNode::new();
        let children: HashMap<String, ScriptNode<i64>> = keys
            .iter()
            .map(|&k| (k.to_owned(), ScriptNode::new()))
            .collect();
        let created = Arc::new(Mutex::new(Vec::new()));
        let for_factory = children.clone();
        let log = Arc::clone(&created);
        let node = GatherNode::new(
            Box::new(source.clone()),
            move |id: &str| -> Box<dyn Node<i64>> {
                log.lock().push(id.to_owned());
                Box::new(for_factory.get(id).expect("scripted child").clone())
            },
        );
        Rig {
            source,
            children,
            created,
            node,
        }
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|&s| s.to_owned()).collect()
    }

    #[tokio::test]
    async fn creates_one_child_per_id() {
        let rig = rig(&["1", "2", "3"]);
        rig.source.push(ids(&["1", "2", "3"]));
        assert_eq!(*rig.created.lock(), ids(&["1", "2", "3"]));
        rig.node.close().await;
    }

    #[tokio::test]
    async fn aggregate_waits_for_every_child() {
        let rig = rig(&["1", "2"]);
        rig.source.push(ids(&["1", "2"]));
        rig.children["1"].push(10);
        assert!(rig.node.current().is_unset(), "one child still unready");
        rig.children["2"].push(20);
        assert_eq!(rig.node.current().value(), Some(&vec![10, 20]));
        rig.node.close().await;
    }

    #[tokio::test]
    async fn reemits_on_any_child_update() {
        let rig = rig(&["1", "2"]);
        rig.source.push(ids(&["1", "2"]));
        rig.children["1"].push(10);
        rig.children["2"].push(20);
        rig.children["1"].push(11);
        assert_eq!(rig.node.current().value(), Some(&vec![11, 20]));
        rig.node.close().await;
    }

    #[tokio::test]
    async fn refresh_reconciles_by_set_difference() {
        let rig = rig(&["1", "2", "3", "4"]);
        rig.source.push(ids(&["1", "2", "3"]));
        for key in ["1", "2", "3"] {
            rig.children[key].push(key.parse().unwrap());
        }
        assert_eq!(rig.node.current().value(), Some(&vec![1, 2, 3]));

        rig.source.push(ids(&["2", "3", "4"]));

        // Exactly one child created (for "4"); "2" and "3" kept.
        assert_eq!(*rig.created.lock(), ids(&["1", "2", "3", "4"]));
        // Exactly one child closed (for "1").
        eventually(|| rig.children["1"].is_closed()).await;
        assert_eq!(rig.children["2"].close_count(), 0);
        assert_eq!(rig.children["3"].close_count(), 0);

        // Survivors keep their values; the aggregate waits for "4".
        assert!(matches!(rig.node.current(), NodeState::Value(_) | NodeState::Unset));
        rig.children["4"].push(4);
        assert_eq!(rig.node.current().value(), Some(&vec![2, 3, 4]));
        rig.node.close().await;
    }

    #[tokio::test]
    async fn removal_alone_reemits_remaining_aggregate() {
        let rig = rig(&["1", "2"]);
        rig.source.push(ids(&["1", "2"]));
        rig.children["1"].push(1);
        rig.children["2"].push(2);
        rig.source.push(ids(&["2"]));
        assert_eq!(rig.node.current().value(), Some(&vec![2]));
        rig.node.close().await;
    }

    #[tokio::test]
    async fn empty_id_sequence_emits_empty_aggregate() {
        let rig = rig(&[]);
        rig.source.push(Vec::new());
        assert_eq!(rig.node.current().value(), Some(&Vec::new()));
        rig.node.close().await;
    }

    #[tokio::test]
    async fn child_error_surfaces_immediately() {
        let rig = rig(&["1", "2"]);
        rig.source.push(ids(&["1", "2"]));
        rig.children["1"].push_error(SyncError::Closed);
        assert_eq!(rig.node.current().error(), Some(&SyncError::Closed));
        rig.node.close().await;
    }

    #[tokio::test]
    async fn source_error_surfaces_immediately() {
        let rig = rig(&[]);
        rig.source.push_error(SyncError::Closed);
        assert_eq!(rig.node.current().error(), Some(&SyncError::Closed));
        rig.node.close().await;
    }

    #[tokio::test]
    async fn removed_child_cannot_publish() {
        let rig = rig(&["1", "2"]);
        rig.source.push(ids(&["1", "2"]));
        rig.children["1"].push(1);
        rig.children["2"].push(2);
        rig.source.push(ids(&["2"]));
        rig.children["1"].push(99);
        assert_eq!(rig.node.current().value(), Some(&vec![2]));
        rig.node.close().await;
    }

    #[tokio::test]
    async fn seeds_from_source_with_existing_value() {
        let source: ScriptNode<Vec<String>> = ScriptNode::new();
        source.push(ids(&["1"]));
        let child: ScriptNode<i64> = ScriptNode::new();
        child.push(5);
        let child_for_factory = child.clone();
        let node = GatherNode::new(
            Box::new(source.clone()),
            move |_: &str| -> Box<dyn Node<i64>> { Box::new(child_for_factory.clone()) },
        );
        assert_eq!(node.current().value(), Some(&vec![5]));
        node.close().await;
    }

    #[tokio::test]
    async fn close_closes_source_and_all_children() {
        let rig = rig(&["1", "2"]);
        rig.source.push(ids(&["1", "2"]));
        rig.node.close().await;
        assert!(rig.source.is_closed());
        assert!(rig.children["1"].is_closed());
        assert!(rig.children["2"].is_closed());
    }

    #[tokio::test]
    async fn double_close_is_idempotent() {
        let rig = rig(&["1"]);
        rig.source.push(ids(&["1"]));
        rig.node.close().await;
        rig.node.close().await;
        assert!(rig.children["1"].is_closed());
    }

    #[tokio::test]
    async fn tracked_ids_follow_the_source() {
        let rig = rig(&["1", "2", "3"]);
        rig.source.push(ids(&["1", "2"]));
        assert_eq!(rig.node.tracked_ids(), ids(&["1", "2"]));
        rig.source.push(ids(&["2", "3"]));
        assert_eq!(rig.node.tracked_ids(), ids(&["2", "3"]));
        rig.node.close().await;
    }
}
