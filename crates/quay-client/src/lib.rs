//! # quay-client
//!
//! The connection layer of the Quay sync engine: one persistent duplex
//! byte stream multiplexes any number of one-shot requests and standing
//! subscriptions.
//!
//! - [`Connection`]: spawns the reader and writer tasks, correlates
//!   envelopes to callers by id
//! - [`SubscriptionSession`]: the unit of server-pushed state — one id, a
//!   current value, a stream of change events, an explicit close handshake
//! - [`ClientConfig`]: tunables (unwatch timeout, write queue depth)
//!
//! Callers of [`Connection::send`] and the `watch_*` methods never block on
//! the network round trip: the correlation id is registered before the
//! request bytes are enqueued, and the caller is resumed when the matching
//! envelope arrives. Outbound requests are written in strict enqueue order
//! by a single writer task.

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
mod routes;
pub mod session;
mod wire;

pub use config::ClientConfig;
pub use connection::Connection;
pub use session::{SessionEvent, SessionState, SessionValue, SubscriptionKind, SubscriptionSession};
