//! Inbound wire messages.
//!
//! Every message the server sends is an [`Envelope`]: a correlation id, an
//! event kind, and an opaque `message` payload whose shape depends on the
//! event. The typed body accessors parse the payload on demand, so a
//! malformed body is an error for that one envelope, never a parse failure
//! for the whole frame stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use quay_core::SyncError;

/// Top-level event kind of an inbound envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeEvent {
    /// One-shot reply to a request.
    Response,
    /// Push for a standing subscription.
    Update,
    /// Server rejected the correlated request or subscription.
    Error,
    /// The server is closing the socket.
    SocketClosed,
}

/// One framed inbound message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation id — matches exactly one outstanding request or
    /// subscription on this connection.
    pub id: String,
    /// Event kind; selects the shape of `message`.
    pub event: EnvelopeEvent,
    /// Event payload, parsed by the typed accessors below.
    pub message: Value,
}

/// Body of an `event = "response"` envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResponseBody {
    /// Whether the correlated request succeeded.
    pub success: bool,
    /// Optional result payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Subscription event kind inside an `event = "update"` envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateEvent {
    /// Object: full current entity. List: one element, keyed.
    Update,
    /// Object: entity gone. List: key removed.
    Delete,
    /// List only: full replacement array.
    Refresh,
    /// List only: one new element.
    Insert,
}

/// Body of an `event = "update"` envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateBody {
    /// Which subscription event this is.
    pub event: UpdateEvent,
    /// Payload: full entity, one element, full array, or a bare key —
    /// absent for object deletions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<Value>,
}

/// Body of an `event = "error"` envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable rejection message.
    pub message: String,
    /// Optional structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Body of an `event = "socket_closed"` envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SocketClosedBody {
    /// Machine-readable close reason.
    pub reason: String,
    /// Human-readable description.
    pub description: String,
}

impl Envelope {
    /// Parse one framed message text.
    ///
    /// Failure here is a framing-level error isolated to this frame.
    pub fn parse(text: &str) -> Result<Self, SyncError> {
        serde_json::from_str(text).map_err(|e| SyncError::framing(e.to_string()))
    }

    /// Parse the payload as a response body.
    pub fn response_body(&self) -> Result<ResponseBody, SyncError> {
        self.body()
    }

    /// Parse the payload as a subscription update body.
    pub fn update_body(&self) -> Result<UpdateBody, SyncError> {
        self.body()
    }

    /// Parse the payload as an error body.
    pub fn error_body(&self) -> Result<ErrorBody, SyncError> {
        self.body()
    }

    /// Parse the payload as a socket-closed body.
    pub fn socket_closed_body(&self) -> Result<SocketClosedBody, SyncError> {
        self.body()
    }

    fn body<T: serde::de::DeserializeOwned>(&self) -> Result<T, SyncError> {
        serde_json::from_value(self.message.clone())
            .map_err(|e| SyncError::decode(format!("envelope {} body: {e}", self.id)))
    }

    /// The error this envelope carries, as a [`SyncError`].
    ///
    /// Only meaningful for `event = "error"`; a malformed body still yields
    /// a usable rejection with the raw payload attached.
    #[must_use]
    pub fn rejection(&self) -> SyncError {
        match self.error_body() {
            Ok(body) => SyncError::Rejected {
                message: body.message,
                data: body.data,
            },
            Err(_) => SyncError::Rejected {
                message: "malformed error body".to_owned(),
                data: Some(self.message.clone()),
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── Wire format fixtures ────────────────────────────────────────

    #[test]
    fn wire_format_response() {
        let raw = r#"{"id": "r1", "event": "response", "message": {"success": true, "data": {"ok": 1}}}"#;
        let env = Envelope::parse(raw).unwrap();
        assert_eq!(env.id, "r1");
        assert_eq!(env.event, EnvelopeEvent::Response);
        let body = env.response_body().unwrap();
        assert!(body.success);
        assert_eq!(body.data.unwrap()["ok"], 1);
    }

    #[test]
    fn wire_format_update() {
        let raw = r#"{"id": "r1", "event": "update", "message": {"event": "update", "updated": {"name": "Mug", "price": 9.5, "dbId": "P1"}}}"#;
        let env = Envelope::parse(raw).unwrap();
        assert_eq!(env.event, EnvelopeEvent::Update);
        let body = env.update_body().unwrap();
        assert_eq!(body.event, UpdateEvent::Update);
        assert_eq!(body.updated.unwrap()["dbId"], "P1");
    }

    #[test]
    fn wire_format_delete_has_no_payload() {
        let raw = r#"{"id": "r1", "event": "update", "message": {"event": "delete"}}"#;
        let env = Envelope::parse(raw).unwrap();
        let body = env.update_body().unwrap();
        assert_eq!(body.event, UpdateEvent::Delete);
        assert!(body.updated.is_none());
    }

    #[test]
    fn wire_format_refresh_carries_array() {
        let raw = r#"{"id": "s1", "event": "update", "message": {"event": "refresh", "updated": [{"dbId": "a"}, {"dbId": "b"}]}}"#;
        let body = Envelope::parse(raw).unwrap().update_body().unwrap();
        assert_eq!(body.event, UpdateEvent::Refresh);
        assert_eq!(body.updated.unwrap().as_array().unwrap().len(), 2);
    }

    #[test]
    fn wire_format_error() {
        let raw = r#"{"id": "r2", "event": "error", "message": {"message": "access revoked", "data": {"model": "order"}}}"#;
        let env = Envelope::parse(raw).unwrap();
        assert_eq!(env.event, EnvelopeEvent::Error);
        let body = env.error_body().unwrap();
        assert_eq!(body.message, "access revoked");
        assert_eq!(body.data.unwrap()["model"], "order");
    }

    #[test]
    fn wire_format_socket_closed() {
        let raw = r#"{"id": "c0", "event": "socket_closed", "message": {"reason": "shutdown", "description": "server going away"}}"#;
        let env = Envelope::parse(raw).unwrap();
        assert_eq!(env.event, EnvelopeEvent::SocketClosed);
        let body = env.socket_closed_body().unwrap();
        assert_eq!(body.reason, "shutdown");
        assert_eq!(body.description, "server going away");
    }

    // ── Parse failures ──────────────────────────────────────────────

    #[test]
    fn non_json_is_framing_error() {
        let err = Envelope::parse("not json").unwrap_err();
        assert_eq!(err.code(), "FRAMING_ERROR");
    }

    #[test]
    fn unknown_event_kind_is_framing_error() {
        let raw = r#"{"id": "r1", "event": "telemetry", "message": {}}"#;
        let err = Envelope::parse(raw).unwrap_err();
        assert_eq!(err.code(), "FRAMING_ERROR");
    }

    #[test]
    fn malformed_body_is_decode_error() {
        let raw = r#"{"id": "r1", "event": "response", "message": {"success": "yes"}}"#;
        let env = Envelope::parse(raw).unwrap();
        let err = env.response_body().unwrap_err();
        assert_eq!(err.code(), "DECODE_ERROR");
        assert!(err.to_string().contains("r1"));
    }

    #[test]
    fn unknown_update_event_is_decode_error() {
        let raw = r#"{"id": "r1", "event": "update", "message": {"event": "upsert", "updated": {}}}"#;
        let env = Envelope::parse(raw).unwrap();
        assert!(env.update_body().is_err());
    }

    // ── rejection() ─────────────────────────────────────────────────

    #[test]
    fn rejection_from_well_formed_body() {
        let env = Envelope {
            id: "r3".into(),
            event: EnvelopeEvent::Error,
            message: json!({"message": "no such model"}),
        };
        match env.rejection() {
            SyncError::Rejected { message, data } => {
                assert_eq!(message, "no such model");
                assert!(data.is_none());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn rejection_from_malformed_body_keeps_payload() {
        let env = Envelope {
            id: "r4".into(),
            event: EnvelopeEvent::Error,
            message: json!(["weird"]),
        };
        match env.rejection() {
            SyncError::Rejected { message, data } => {
                assert_eq!(message, "malformed error body");
                assert_eq!(data.unwrap(), json!(["weird"]));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    // ── Serialization (round-trip for test servers) ─────────────────

    #[test]
    fn envelope_roundtrip() {
        let env = Envelope {
            id: "r5".into(),
            event: EnvelopeEvent::Update,
            message: json!({"event": "insert", "updated": {"dbId": "x"}}),
        };
        let text = serde_json::to_string(&env).unwrap();
        assert!(text.contains("\"update\""));
        let back = Envelope::parse(&text).unwrap();
        assert_eq!(back.id, "r5");
        assert_eq!(back.update_body().unwrap().event, UpdateEvent::Insert);
    }

    #[test]
    fn delete_body_serializes_without_updated() {
        let body = UpdateBody {
            event: UpdateEvent::Delete,
            updated: None,
        };
        let text = serde_json::to_string(&body).unwrap();
        assert!(!text.contains("updated"));
    }
}
