//! Transport contract.
//!
//! Any wire mechanism integrates with the hub by implementing [`Transport`];
//! the hub and the RPC layer need no changes for a new one.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use sessionbus_core::{Event, Result};

use crate::hub::listener::{panic_message, EventListener};
use crate::hub::registry::{lock, Registry, Subscription};

/// Connection state owned by each transport instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification delivered to connection-state observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionChange {
    pub transport: String,
    pub state: ConnectionState,
    pub error: Option<String>,
}

pub type ConnectionObserver = Arc<dyn Fn(&ConnectionChange) + Send + Sync>;

/// Capability set every wire transport provides.
///
/// `send` follows the transport's own policy (deliver, queue or fail);
/// callers check `is_ready` before assuming delivery. `name` is for
/// diagnostics only.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Idempotent setup; may establish a connection.
    async fn initialize(&self) -> Result<()>;

    async fn send(&self, event: &Event) -> Result<()>;

    /// Idempotent teardown: stops timers and releases the connection.
    async fn close(&self) -> Result<()>;

    /// Synchronous, side-effect-free readiness check.
    fn is_ready(&self) -> bool;

    fn on_event(&self, listener: Arc<dyn EventListener>) -> Subscription;

    fn on_connection_change(&self, observer: ConnectionObserver) -> Subscription;
}

/// State cell plus observer set, for transport implementations.
///
/// Observers hear about every state transition, and additionally about any
/// update carrying an error even when the state value repeats.
pub struct ConnectionTracker {
    transport: String,
    state: Mutex<ConnectionState>,
    observers: Arc<Registry<ConnectionObserver>>,
}

impl ConnectionTracker {
    pub fn new(transport: impl Into<String>) -> Self {
        Self {
            transport: transport.into(),
            state: Mutex::new(ConnectionState::Disconnected),
            observers: Registry::new(),
        }
    }

    pub fn get(&self) -> ConnectionState {
        *lock(&self.state)
    }

    pub fn subscribe(&self, observer: ConnectionObserver) -> Subscription {
        self.observers.subscribe(observer)
    }

    /// Returns whether the state value changed.
    pub fn set(&self, state: ConnectionState, error: Option<String>) -> bool {
        let changed = {
            let mut cur = lock(&self.state);
            let prev = *cur;
            *cur = state;
            prev != state
        };
        if changed || error.is_some() {
            self.notify(state, error);
        }
        changed
    }

    /// Move to `Connecting` unless a connect or a live connection is
    /// already in flight.
    pub fn begin_connecting(&self) -> bool {
        {
            let mut cur = lock(&self.state);
            if matches!(*cur, ConnectionState::Connecting | ConnectionState::Connected) {
                return false;
            }
            *cur = ConnectionState::Connecting;
        }
        self.notify(ConnectionState::Connecting, None);
        true
    }

    fn notify(&self, state: ConnectionState, error: Option<String>) {
        let change = ConnectionChange {
            transport: self.transport.clone(),
            state,
            error,
        };
        for observer in self.observers.snapshot() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| observer(&change))) {
                tracing::warn!(
                    transport = %self.transport,
                    panic = panic_message(panic.as_ref()),
                    "connection observer panicked"
                );
            }
        }
    }
}
