//! Heartbeat control frames.
//!
//! `ping`/`pong` share the envelope's `type` field but carry no session id;
//! transports consume them internally and never hand them to subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionBusError};

/// Reserved type of the heartbeat probe.
pub const PING: &str = "ping";
/// Reserved type of the heartbeat reply.
pub const PONG: &str = "pong";

/// Keep-alive frame exchanged outside the event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlFrame {
    Ping {
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
    Pong {
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
}

impl ControlFrame {
    pub fn ping() -> Self {
        ControlFrame::Ping { timestamp: Utc::now() }
    }

    pub fn pong() -> Self {
        ControlFrame::Pong { timestamp: Utc::now() }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| SessionBusError::Internal(format!("control frame encode failed: {e}")))
    }
}

/// True for the reserved control types.
pub fn is_control_type(t: &str) -> bool {
    t == PING || t == PONG
}
