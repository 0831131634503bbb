//! Outbound wire messages.
//!
//! A [`Request`] is the only thing a client ever writes: a client-generated
//! correlation id, a request type, and a typed body. The id must be unique
//! for the lifetime of the connection and is echoed back in every related
//! envelope; for `watch_*` requests it becomes the subscription's id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use quay_core::{ModelKind, RequestId, SubscriptionId, SyncError};

/// Request types consumed by the sync core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    /// Open an object subscription to a single entity.
    WatchModel,
    /// Open a list subscription to a collection or sub-document array.
    WatchList,
    /// Close a subscription by its original id.
    UnwatchModel,
}

/// One outbound message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Request {
    /// Client-generated correlation id.
    pub id: RequestId,
    /// Request type.
    #[serde(rename = "type")]
    pub request_type: RequestType,
    /// Typed body, shape fixed by `request_type`.
    pub body: Value,
}

/// Sub-document address for a scoped list watch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListPath {
    /// Id of the owning entity.
    pub id: String,
    /// Property path of the array inside the owning entity.
    pub props: String,
}

#[derive(Serialize)]
struct WatchModelBody<'a> {
    model: ModelKind,
    id: &'a str,
}

#[derive(Serialize)]
struct WatchListBody<'a> {
    model: ModelKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<&'a ListPath>,
}

#[derive(Serialize)]
struct UnwatchModelBody<'a> {
    id: &'a str,
}

impl Request {
    /// Build a `watch_model` request for one entity.
    #[must_use]
    pub fn watch_model(model: ModelKind, entity_id: &str) -> Self {
        Self {
            id: RequestId::new(),
            request_type: RequestType::WatchModel,
            body: serde_json::to_value(WatchModelBody {
                model,
                id: entity_id,
            })
            .expect("watch_model body serializes"),
        }
    }

    /// Build a `watch_list` request.
    ///
    /// `path = None` watches the entire collection.
    #[must_use]
    pub fn watch_list(model: ModelKind, path: Option<&ListPath>) -> Self {
        Self {
            id: RequestId::new(),
            request_type: RequestType::WatchList,
            body: serde_json::to_value(WatchListBody { model, path })
                .expect("watch_list body serializes"),
        }
    }

    /// Build an `unwatch_model` request correlated by the subscription's
    /// own id. The request itself gets a fresh id.
    #[must_use]
    pub fn unwatch_model(subscription: &SubscriptionId) -> Self {
        Self {
            id: RequestId::new(),
            request_type: RequestType::UnwatchModel,
            body: serde_json::to_value(UnwatchModelBody {
                id: subscription.as_str(),
            })
            .expect("unwatch_model body serializes"),
        }
    }

    /// Serialize for the wire.
    pub fn to_json(&self) -> Result<String, SyncError> {
        serde_json::to_string(self).map_err(|e| SyncError::decode(e.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
