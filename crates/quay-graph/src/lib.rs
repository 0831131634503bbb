//! # quay-graph
//!
//! Composable reactive nodes over subscription sessions.
//!
//! Every node holds one current value-or-error-or-unset state, owns the
//! sessions and child nodes it created, and closes everything it owns when
//! closed. Observers are notified synchronously on the task that delivered
//! the triggering event.
//!
//! | Node | Derivation |
//! |------|------------|
//! | [`ObjectNode`] | one object subscription, decoded 1:1 |
//! | [`CollectionNode`] | one list subscription, decoded element sequence |
//! | [`CombineNode`] | latest pair from two upstreams |
//! | [`SwitchNode`] | value-dependent rewiring via a node factory |
//! | [`GatherNode`] | one child node per id in a dynamic id sequence |
//! | [`SnapshotNode`] | first value only, then upstream disconnect |
//! | [`MapNode`] | pure synchronous transform |
//!
//! Errors from any owned upstream surface immediately as the combinator's
//! own state; no node ever retries on an upstream's behalf — reissuing a
//! watch belongs to the application layer.

#![deny(unsafe_code)]

pub mod collection;
pub mod combine;
pub mod gather;
pub mod map;
pub mod node;
pub mod object;
pub mod snapshot;
pub mod switch;

#[cfg(test)]
pub(crate) mod testing;

pub use collection::{CollectionNode, ElementEvent};
pub use combine::CombineNode;
pub use gather::GatherNode;
pub use map::MapNode;
pub use node::{Node, NodeState, Observer};
pub use object::ObjectNode;
pub use snapshot::SnapshotNode;
pub use switch::SwitchNode;
