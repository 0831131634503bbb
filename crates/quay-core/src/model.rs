//! Model vocabulary and payload decoding.
//!
//! The wire protocol names entity collections with [`ModelKind`]; decoding a
//! payload into a typed entity goes through the [`Decoder`] trait, which the
//! surrounding application implements (or gets for free from serde via
//! [`JsonDecoder`]). The engine itself never interprets entity fields —
//! with one exception: the stable element key (`dbId`, or a primary `_id`
//! normalized to it) is stripped before decoding and reattached as
//! [`Keyed::key`].

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::SyncError;

/// Entity collections addressable by `watch_model` / `watch_list`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// A selling vendor.
    Vendor,
    /// A market a vendor sells at.
    Market,
    /// A photo attached to a vendor or market.
    Photo,
    /// A product listing.
    Product,
    /// A placed order.
    Order,
    /// A user profile.
    Profile,
}

impl ModelKind {
    /// Wire name of this kind (the serde snake_case rename).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vendor => "vendor",
            Self::Market => "market",
            Self::Photo => "photo",
            Self::Product => "product",
            Self::Order => "order",
            Self::Profile => "profile",
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A list element paired with its stable key.
#[derive(Clone, Debug, PartialEq)]
pub struct Keyed<T> {
    /// Stable element key (`dbId`).
    pub key: String,
    /// Decoded element value.
    pub value: T,
}

impl<T> Keyed<T> {
    /// Pair a key with a value.
    pub fn new(key: impl Into<String>, value: T) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Pure function from wire payload to typed value.
///
/// Implementations must not perform I/O; a failed decode surfaces as
/// [`SyncError::Decode`] to exactly the subscription owning the payload.
pub trait Decoder<T>: Send + Sync {
    /// Decode one payload.
    fn decode(&self, payload: &Value) -> Result<T, SyncError>;
}

impl<T, F> Decoder<T> for F
where
    F: Fn(&Value) -> Result<T, SyncError> + Send + Sync,
{
    fn decode(&self, payload: &Value) -> Result<T, SyncError> {
        self(payload)
    }
}

/// Serde-backed decoder for any `DeserializeOwned` entity type.
pub struct JsonDecoder<T> {
    kind: Option<ModelKind>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonDecoder<T> {
    /// Decoder with no model kind attached to its errors.
    #[must_use]
    pub fn new() -> Self {
        Self {
            kind: None,
            _marker: PhantomData,
        }
    }

    /// Decoder whose errors carry the given model kind.
    #[must_use]
    pub fn for_kind(kind: ModelKind) -> Self {
        Self {
            kind: Some(kind),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> Decoder<T> for JsonDecoder<T> {
    fn decode(&self, payload: &Value) -> Result<T, SyncError> {
        serde_json::from_value(payload.clone()).map_err(|e| SyncError::Decode {
            model: self.kind,
            detail: e.to_string(),
        })
    }
}

/// Extract the stable key from a list element and strip it from the payload.
///
/// Accepts `dbId` or a primary `_id` (normalized to the same key). The
/// returned payload no longer contains either field, so entity decoders
/// never see them.
pub fn split_key(element: Value) -> Result<(String, Value), SyncError> {
    let Value::Object(mut map) = element else {
        return Err(SyncError::decode("list element is not a JSON object"));
    };
    let key = map
        .remove("dbId")
        .or_else(|| map.remove("_id"))
        .ok_or_else(|| SyncError::decode("list element has no dbId or _id"))?;
    let _ = map.remove("_id");
    match key {
        Value::String(s) => Ok((s, Value::Object(map))),
        other => Err(SyncError::decode(format!(
            "element key is not a string: {other}"
        ))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Product {
        name: String,
        price: f64,
    }

    #[test]
    fn model_kind_wire_names() {
        assert_eq!(serde_json::to_string(&ModelKind::Vendor).unwrap(), "\"vendor\"");
        assert_eq!(serde_json::to_string(&ModelKind::Market).unwrap(), "\"market\"");
        assert_eq!(serde_json::to_string(&ModelKind::Photo).unwrap(), "\"photo\"");
        assert_eq!(serde_json::to_string(&ModelKind::Product).unwrap(), "\"product\"");
        assert_eq!(serde_json::to_string(&ModelKind::Order).unwrap(), "\"order\"");
        assert_eq!(serde_json::to_string(&ModelKind::Profile).unwrap(), "\"profile\"");
    }

    #[test]
    fn model_kind_display_matches_wire() {
        assert_eq!(ModelKind::Vendor.to_string(), "vendor");
        assert_eq!(ModelKind::Order.as_str(), "order");
    }

    #[test]
    fn unknown_model_kind_fails_decode() {
        let result: Result<ModelKind, _> = serde_json::from_str("\"warehouse\"");
        assert!(result.is_err());
    }

    #[test]
    fn json_decoder_decodes() {
        let decoder = JsonDecoder::<Product>::new();
        let value = decoder.decode(&json!({"name": "Mug", "price": 9.5})).unwrap();
        assert_eq!(
            value,
            Product {
                name: "Mug".into(),
                price: 9.5
            }
        );
    }

    #[test]
    fn json_decoder_reports_model_kind() {
        let decoder = JsonDecoder::<Product>::for_kind(ModelKind::Product);
        let err = decoder.decode(&json!({"name": "Mug"})).unwrap_err();
        match err {
            SyncError::Decode { model, detail } => {
                assert_eq!(model, Some(ModelKind::Product));
                assert!(detail.contains("price"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn closure_is_a_decoder() {
        let decoder = |payload: &Value| {
            payload
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or_else(|| SyncError::decode("no name"))
        };
        assert_eq!(decoder.decode(&json!({"name": "Fig"})).unwrap(), "Fig");
        assert!(decoder.decode(&json!({})).is_err());
    }

    #[test]
    fn split_key_prefers_db_id() {
        let (key, rest) = split_key(json!({"dbId": "P1", "name": "Mug"})).unwrap();
        assert_eq!(key, "P1");
        assert_eq!(rest, json!({"name": "Mug"}));
    }

    #[test]
    fn split_key_normalizes_underscore_id() {
        let (key, rest) = split_key(json!({"_id": "P2", "name": "Bowl"})).unwrap();
        assert_eq!(key, "P2");
        assert_eq!(rest, json!({"name": "Bowl"}));
    }

    #[test]
    fn split_key_strips_both_id_fields() {
        let (key, rest) = split_key(json!({"dbId": "P3", "_id": "P3", "name": "Pan"})).unwrap();
        assert_eq!(key, "P3");
        assert!(rest.get("_id").is_none());
        assert!(rest.get("dbId").is_none());
    }

    #[test]
    fn split_key_rejects_missing_key() {
        let err = split_key(json!({"name": "Anon"})).unwrap_err();
        assert_eq!(err.code(), "DECODE_ERROR");
    }

    #[test]
    fn split_key_rejects_non_object() {
        assert!(split_key(json!([1, 2, 3])).is_err());
        assert!(split_key(json!("scalar")).is_err());
    }

    #[test]
    fn split_key_rejects_non_string_key() {
        let err = split_key(json!({"dbId": 42})).unwrap_err();
        assert_eq!(err.code(), "DECODE_ERROR");
    }

    #[test]
    fn keyed_constructor() {
        let keyed = Keyed::new("K1", 7);
        assert_eq!(keyed.key, "K1");
        assert_eq!(keyed.value, 7);
    }
}
