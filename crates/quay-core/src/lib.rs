//! # quay-core
//!
//! Foundation types for the Quay realtime sync engine.
//!
//! This crate provides the shared vocabulary the other Quay crates depend on:
//!
//! - **Branded IDs**: `RequestId`, `SubscriptionId` as newtypes for type safety
//! - **Errors**: the `SyncError` taxonomy (transport, framing, decode,
//!   entity-deleted, server rejection) via `thiserror`
//! - **Model vocabulary**: the `ModelKind` wire enum and the `Decoder` trait
//!   that turns raw payloads into typed entities
//! - **Observers**: the engine-scoped publish/subscribe primitive
//! - **Logging**: `tracing-subscriber` initialization helpers

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod model;
pub mod observers;

pub use errors::SyncError;
pub use ids::{RequestId, SubscriptionId};
pub use model::{Decoder, JsonDecoder, Keyed, ModelKind};
pub use observers::{ObserverList, SubscriberHandle};
