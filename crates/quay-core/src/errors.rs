//! Error taxonomy for the sync engine.
//!
//! Every failure the core can surface is a [`SyncError`]. The type is
//! deliberately `Clone`: one error is fanned out to every observer that
//! depends on the failing id, and combinator nodes hold it as their current
//! state. Causes are therefore carried as rendered strings rather than
//! boxed sources.
//!
//! Propagation policy: the core never retries. An error reaches exactly the
//! sessions and callbacks registered for the failing id; sibling
//! subscriptions are unaffected.

use serde_json::Value;
use thiserror::Error;

use crate::model::ModelKind;

/// Errors surfaced by the sync engine.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum SyncError {
    /// The duplex channel closed or faulted. Delivered to every live
    /// subscription and pending request; the connection is unusable after.
    #[error("transport closed ({reason}): {description}")]
    Transport {
        /// Machine-readable close reason from the wire, or `"io"`.
        reason: String,
        /// Human-readable description.
        description: String,
    },

    /// A completed frame was not valid JSON or not valid UTF-8. Isolated to
    /// that one frame; subsequent framing is unaffected.
    #[error("invalid frame: {detail}")]
    Framing {
        /// What failed to parse.
        detail: String,
    },

    /// A frame was valid JSON but failed entity-specific decoding.
    #[error("decode failed: {detail}")]
    Decode {
        /// Model kind being decoded, when known.
        model: Option<ModelKind>,
        /// What the decoder rejected.
        detail: String,
    },

    /// The entity behind an object subscription was deleted while the
    /// subscription was active. Distinguished from a generic error: an
    /// object whose backing entity disappears is a failure state for every
    /// downstream consumer, not a valid value.
    #[error("entity deleted: {id}")]
    EntityDeleted {
        /// Subscription id whose entity disappeared.
        id: String,
    },

    /// The server explicitly rejected a request (`event = "error"`).
    #[error("server rejected request: {message}")]
    Rejected {
        /// Server-supplied message.
        message: String,
        /// Optional structured details.
        data: Option<Value>,
    },

    /// Operation attempted on a closed connection or session.
    #[error("connection or session closed")]
    Closed,

    /// The unwatch acknowledgement did not arrive within the configured
    /// timeout; the session was forced to `Closed` locally.
    #[error("unwatch acknowledgement timed out for {id}")]
    UnwatchTimeout {
        /// Subscription id that was force-closed.
        id: String,
    },
}

impl SyncError {
    /// Build a transport error from an I/O-level failure.
    #[must_use]
    pub fn io(description: impl Into<String>) -> Self {
        Self::Transport {
            reason: "io".to_owned(),
            description: description.into(),
        }
    }

    /// Build a framing error for a single bad frame.
    #[must_use]
    pub fn framing(detail: impl Into<String>) -> Self {
        Self::Framing {
            detail: detail.into(),
        }
    }

    /// Build a decode error without a known model kind.
    #[must_use]
    pub fn decode(detail: impl Into<String>) -> Self {
        Self::Decode {
            model: None,
            detail: detail.into(),
        }
    }

    /// Build a decode error for a specific model kind.
    #[must_use]
    pub fn decode_for(model: ModelKind, detail: impl Into<String>) -> Self {
        Self::Decode {
            model: Some(model),
            detail: detail.into(),
        }
    }

    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "TRANSPORT_CLOSED",
            Self::Framing { .. } => "FRAMING_ERROR",
            Self::Decode { .. } => "DECODE_ERROR",
            Self::EntityDeleted { .. } => "ENTITY_DELETED",
            Self::Rejected { .. } => "REQUEST_REJECTED",
            Self::Closed => "CLOSED",
            Self::UnwatchTimeout { .. } => "UNWATCH_TIMEOUT",
        }
    }

    /// Whether this is the distinguished object-deletion state.
    #[must_use]
    pub fn is_entity_deleted(&self) -> bool {
        matches!(self, Self::EntityDeleted { .. })
    }

    /// Whether this error means the whole connection is gone.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
