//! Programmatic options for hubs, transports and RPC calls.

use std::time::Duration;

use serde::Deserialize;
use sessionbus_core::error::{Result, SessionBusError};

/// Event hub options.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct HubConfig {
    pub session_id: String,
    /// Enables per-event diagnostic logging.
    #[serde(default)]
    pub debug: bool,
}

impl HubConfig {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            debug: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        require_session_id(&self.session_id)
    }
}

/// Reconnecting client socket options.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ClientTransportConfig {
    pub url: String,
    pub session_id: String,

    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Base backoff in milliseconds.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
}

impl ClientTransportConfig {
    pub fn new(url: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            session_id: session_id.into(),
            auto_reconnect: default_auto_reconnect(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            ping_interval_ms: default_ping_interval_ms(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        require_session_id(&self.session_id)?;
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(SessionBusError::BadRequest(
                "client.url must be a ws:// or wss:// url".into(),
            ));
        }
        if self.reconnect_delay_ms == 0 {
            return Err(SessionBusError::BadRequest(
                "client.reconnectDelay must be greater than 0".into(),
            ));
        }
        if self.ping_interval_ms == 0 {
            return Err(SessionBusError::BadRequest(
                "client.pingInterval must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }
}

/// Server-side fan-out group options.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ServerTransportConfig {
    pub session_id: String,
    /// Events kept for a late joiner while nobody is connected; 0 disables.
    #[serde(default)]
    pub replay_backlog: usize,
}

impl ServerTransportConfig {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            replay_backlog: 0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        require_session_id(&self.session_id)
    }
}

/// Per-call RPC overrides.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub timeout: Option<Duration>,
    pub session_id: Option<String>,
}

impl RequestOptions {
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            session_id: None,
        }
    }
}

fn require_session_id(session_id: &str) -> Result<()> {
    if session_id.trim().is_empty() {
        return Err(SessionBusError::BadRequest("sessionId must not be empty".into()));
    }
    Ok(())
}

fn default_auto_reconnect() -> bool {
    true
}
fn default_max_reconnect_attempts() -> u32 {
    5
}
fn default_reconnect_delay_ms() -> u64 {
    1000
}
fn default_ping_interval_ms() -> u64 {
    30000
}
