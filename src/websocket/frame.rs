//! Decoding of inbound WebSocket text into a closed set of frame kinds.
//!
//! Kraken mixes method frames (`{"method": ...}`), event frames
//! (`{"event": ...}`, used by challenge/response endpoints) and channel
//! frames (`{"channel": ...}`). The shape is inspected once here; every
//! consumer downstream matches on [`Frame`].

use serde_json::Value;

use crate::Result;
use crate::error::LadderError;
use crate::models::book::BookMessage;
use crate::models::{Channel, PongResponse, StatusUpdateResponse, SubscriptionAck};

/// One decoded inbound message.
#[derive(Debug, Clone)]
pub enum Frame {
    /// Reply to a `ping`.
    Pong(PongResponse),
    /// Periodic heartbeat on the `heartbeat` channel.
    Heartbeat,
    /// Exchange status broadcast.
    Status(StatusUpdateResponse),
    /// Acknowledgement of a subscribe or unsubscribe request.
    Subscription(SubscriptionAck),
    /// Snapshot or update on the `book` channel.
    Book(BookMessage),
    /// Challenge string to be signed by challenge/response sessions.
    Challenge(String),
    /// Any other RPC response, e.g. `add_order`.
    Response { method: String, body: Value },
    /// Data on any other channel, e.g. `ticker`.
    Channel { channel: String, body: Value },
    /// Event-style frame other than a challenge.
    Event { event: String, body: Value },
    /// Anything that is valid JSON but carries no routing key.
    Data(Value),
}

impl Frame {
    /// Parses raw text into a frame.
    ///
    /// # Errors
    ///
    /// Returns [`LadderError::MalformedMessage`] if the text is not JSON, is
    /// a bare scalar, or a known frame kind does not match its schema.
    pub fn decode(text: &str) -> Result<Frame> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| LadderError::MalformedMessage(e.to_string()))?;
        Frame::from_value(value)
    }

    /// Classifies an already-parsed JSON value.
    ///
    /// # Errors
    ///
    /// See [`Frame::decode`].
    pub fn from_value(value: Value) -> Result<Frame> {
        let object = match &value {
            Value::Object(object) => object,
            Value::Array(_) => return Ok(Frame::Data(value)),
            other => {
                return Err(LadderError::MalformedMessage(format!(
                    "unexpected top-level JSON value: {other}"
                )));
            }
        };

        if let Some(method) = object.get("method").and_then(Value::as_str) {
            return match method {
                "pong" => Ok(Frame::Pong(typed(value)?)),
                "subscribe" | "unsubscribe" => Ok(Frame::Subscription(typed(value)?)),
                _ => Ok(Frame::Response {
                    method: method.to_string(),
                    body: value,
                }),
            };
        }

        if let Some(event) = object.get("event").and_then(Value::as_str) {
            if event == "challenge"
                && let Some(message) = object.get("message").and_then(Value::as_str)
            {
                return Ok(Frame::Challenge(message.to_string()));
            }
            return Ok(Frame::Event {
                event: event.to_string(),
                body: value,
            });
        }

        if let Some(channel) = object.get("channel").and_then(Value::as_str) {
            return match Channel::from_wire(channel) {
                Some(Channel::Heartbeat) => Ok(Frame::Heartbeat),
                Some(Channel::Status) => Ok(Frame::Status(typed(value)?)),
                Some(Channel::Book) => Ok(Frame::Book(typed(value)?)),
                _ => Ok(Frame::Channel {
                    channel: channel.to_string(),
                    body: value,
                }),
            };
        }

        Ok(Frame::Data(value))
    }
}

fn typed<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| LadderError::MalformedMessage(e.to_string()))
}
