//! Event envelope (JSON).
//!
//! The envelope is shared by every route; `data` is a generic slot so that
//! each request/response pair can carry its own strongly typed payload while
//! the hub and transports move `Event<Value>` around.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Result, SessionBusError};

/// Conventional suffix of request event types.
pub const REQUEST_SUFFIX: &str = ".request";
/// Conventional suffix of response event types.
pub const RESPONSE_SUFFIX: &str = ".response";

/// The unit of communication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(bound(deserialize = "T: Deserialize<'de> + Default"))]
pub struct Event<T = Value> {
    /// Opaque unique identifier.
    #[serde(default = "new_event_id")]
    pub id: String,
    /// Dot-namespaced type (field name is `type` in JSON).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Owning session.
    pub session_id: String,
    /// Capture time, RFC 3339 on the wire.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Route-specific payload.
    #[serde(default)]
    pub data: T,
}

fn new_event_id() -> String {
    Uuid::new_v4().to_string()
}

impl<T> Event<T> {
    /// Build an event with a fresh id and the current time.
    pub fn new(event_type: impl Into<String>, session_id: impl Into<String>, data: T) -> Self {
        Self {
            id: new_event_id(),
            event_type: event_type.into(),
            session_id: session_id.into(),
            timestamp: Utc::now(),
            data,
        }
    }

    /// True when the type follows the response naming convention.
    pub fn is_response(&self) -> bool {
        self.event_type.ends_with(RESPONSE_SUFFIX)
    }

    /// True when the type follows the request naming convention.
    pub fn is_request(&self) -> bool {
        self.event_type.ends_with(REQUEST_SUFFIX)
    }
}

impl<T: Serialize> Event<T> {
    /// Erase the payload type into the generic JSON slot.
    pub fn into_untyped(self) -> Result<Event> {
        let data = serde_json::to_value(&self.data)
            .map_err(|e| SessionBusError::BadRequest(format!("event data encode failed: {e}")))?;
        Ok(Event {
            id: self.id,
            event_type: self.event_type,
            session_id: self.session_id,
            timestamp: self.timestamp,
            data,
        })
    }

    /// Serialize the whole envelope to a JSON text frame.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| SessionBusError::BadRequest(format!("event encode failed: {e}")))
    }
}

impl Event {
    /// Decode the payload into a route type.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            SessionBusError::BadRequest(format!("{} invalid data: {e}", self.event_type))
        })
    }

    /// Decode the payload and keep the envelope.
    pub fn typed<T: DeserializeOwned>(&self) -> Result<Event<T>> {
        Ok(Event {
            id: self.id.clone(),
            event_type: self.event_type.clone(),
            session_id: self.session_id.clone(),
            timestamp: self.timestamp,
            data: self.data_as()?,
        })
    }
}

/// Derive the conventional response type for a request type.
///
/// `goal.create.request` becomes `goal.create.response`; a type without the
/// request suffix just gets the response suffix appended. This is a naming
/// convention only: responders may answer with any type the requester
/// listens for.
pub fn response_type_for(request_type: &str) -> String {
    match request_type.strip_suffix(REQUEST_SUFFIX) {
        Some(prefix) => format!("{prefix}{RESPONSE_SUFFIX}"),
        None => format!("{request_type}{RESPONSE_SUFFIX}"),
    }
}
