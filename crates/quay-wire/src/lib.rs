//! # quay-wire
//!
//! Wire schema and framing for the Quay sync protocol.
//!
//! Messages are self-delimiting JSON objects on an ordered byte stream; there
//! is no length prefix. [`frame::FrameDecoder`] recovers message boundaries by
//! brace balance, and the types in [`envelope`] and [`request`] give the
//! recovered text its shape:
//!
//! - [`Envelope`]: every inbound message — an id, an event kind, a payload
//! - [`Request`]: every outbound message — `watch_model`, `watch_list`,
//!   `unwatch_model`
//!
//! These types match the wire format exactly; servers and clients on other
//! platforms depend on the string values.

#![deny(unsafe_code)]

pub mod envelope;
pub mod frame;
pub mod request;

pub use envelope::{Envelope, EnvelopeEvent, ErrorBody, ResponseBody, SocketClosedBody, UpdateBody, UpdateEvent};
pub use frame::{FrameDecoder, FrameError};
pub use request::{ListPath, Request, RequestType};
