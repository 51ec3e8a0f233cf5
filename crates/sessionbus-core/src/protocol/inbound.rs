//! Decode-once classification of inbound payloads.
//!
//! Transports receive either pre-parsed JSON (in-process producers) or raw
//! text/binary frames off a socket. Everything is parsed once into a
//! `Value`, control frames are split off, and the rest must carry both a
//! `type` and a `sessionId` to become an `Event`.

use bytes::Bytes;
use serde_json::Value;

use super::control::{is_control_type, ControlFrame};
use super::event::Event;
use crate::error::{Result, SessionBusError};

/// Raw inbound payload as handed over by a transport.
#[derive(Debug, Clone)]
pub enum InboundPayload {
    Parsed(Value),
    Text(String),
    Binary(Bytes),
}

impl From<Value> for InboundPayload {
    fn from(v: Value) -> Self {
        InboundPayload::Parsed(v)
    }
}

impl From<String> for InboundPayload {
    fn from(s: String) -> Self {
        InboundPayload::Text(s)
    }
}

impl From<&str> for InboundPayload {
    fn from(s: &str) -> Self {
        InboundPayload::Text(s.to_string())
    }
}

impl From<Bytes> for InboundPayload {
    fn from(b: Bytes) -> Self {
        InboundPayload::Binary(b)
    }
}

impl InboundPayload {
    pub fn len(&self) -> usize {
        match self {
            InboundPayload::Parsed(_) => 0,
            InboundPayload::Text(s) => s.len(),
            InboundPayload::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn into_value(self) -> Result<Value> {
        match self {
            InboundPayload::Parsed(v) => Ok(v),
            InboundPayload::Text(s) => serde_json::from_str(&s)
                .map_err(|e| SessionBusError::BadRequest(format!("invalid frame json: {e}"))),
            InboundPayload::Binary(b) => serde_json::from_slice(&b)
                .map_err(|e| SessionBusError::BadRequest(format!("invalid frame json: {e}"))),
        }
    }
}

/// Classified inbound frame.
#[derive(Debug, Clone)]
pub enum Inbound {
    Control(ControlFrame),
    Event(Event),
}

/// Parse and classify a payload.
pub fn decode(payload: InboundPayload) -> Result<Inbound> {
    let value = payload.into_value()?;

    let frame_type = value.get("type").and_then(Value::as_str);
    if let Some(t) = frame_type {
        if is_control_type(t) {
            let frame: ControlFrame = serde_json::from_value(value)
                .map_err(|e| SessionBusError::BadRequest(format!("invalid control frame: {e}")))?;
            return Ok(Inbound::Control(frame));
        }
    }

    let has_session = value.get("sessionId").and_then(Value::as_str).is_some();
    match (frame_type.is_some(), has_session) {
        (true, true) => {}
        (false, _) => return Err(SessionBusError::BadRequest("frame missing type".into())),
        (_, false) => return Err(SessionBusError::BadRequest("frame missing sessionId".into())),
    }

    let event: Event = serde_json::from_value(value)
        .map_err(|e| SessionBusError::BadRequest(format!("invalid event envelope: {e}")))?;
    Ok(Inbound::Event(event))
}
