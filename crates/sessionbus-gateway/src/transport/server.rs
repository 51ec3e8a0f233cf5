//! Server-side fan-out group for one session's inbound connections.
//!
//! `send` serializes once and broadcasts to every open member; members found
//! closed are pruned after the pass. Connection-state notifications fire only
//! when membership goes 0 -> 1 or 1 -> 0.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::ws::Message;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use sessionbus_core::error::Result;
use sessionbus_core::protocol::control::ControlFrame;
use sessionbus_core::protocol::inbound::{self, Inbound, InboundPayload};
use sessionbus_core::Event;

use crate::config::ServerTransportConfig;
use crate::hub::listener::{deliver, EventListener};
use crate::hub::registry::{lock, Registry, Subscription};
use crate::transport::contract::{ConnectionObserver, ConnectionState, ConnectionTracker, Transport};

/// Per-connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One member's outbound queue sender.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<Message>,
}

impl Connection {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self {
            id: ConnectionId::new(),
            tx,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Open while the socket task still holds the receiving end.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

enum Delivery {
    Sent,
    Dropped,
    Dead,
}

fn deliver_text(conn: &Connection, text: &str) -> Delivery {
    if !conn.is_open() {
        return Delivery::Dead;
    }
    match conn.tx.try_send(Message::Text(text.to_string())) {
        Ok(()) => Delivery::Sent,
        Err(TrySendError::Full(_)) => Delivery::Dropped,
        Err(TrySendError::Closed(_)) => Delivery::Dead,
    }
}

/// Broadcast unit for one session.
pub struct ServerTransport {
    name: String,
    cfg: ServerTransportConfig,
    members: Mutex<Vec<Connection>>,
    /// Serialized events kept for a late joiner; only used with `replay_backlog > 0`.
    backlog: Mutex<VecDeque<String>>,
    listeners: Arc<Registry<Arc<dyn EventListener>>>,
    state: ConnectionTracker,
}

impl ServerTransport {
    pub fn new(cfg: ServerTransportConfig) -> Result<Self> {
        cfg.validate()?;
        let name = format!("server:{}", cfg.session_id);
        Ok(Self {
            state: ConnectionTracker::new(name.clone()),
            name,
            cfg,
            members: Mutex::new(Vec::new()),
            backlog: Mutex::new(VecDeque::new()),
            listeners: Registry::new(),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.cfg.session_id
    }

    pub fn member_count(&self) -> usize {
        lock(&self.members).len()
    }

    pub fn backlog_len(&self) -> usize {
        lock(&self.backlog).len()
    }

    /// Add a member. The member that ends an empty period receives the
    /// replay backlog, if one is configured.
    pub fn subscribe_websocket(&self, conn: Connection) {
        let became_active = {
            let mut members = lock(&self.members);
            if members.iter().any(|m| m.id == conn.id) {
                return;
            }

            let first = members.is_empty();
            if first {
                let mut backlog = lock(&self.backlog);
                let replayed = backlog.len();
                for text in backlog.drain(..) {
                    if !matches!(deliver_text(&conn, &text), Delivery::Sent) {
                        tracing::warn!(transport = %self.name, conn_id = %conn.id, "backlog replay dropped an event");
                    }
                }
                if replayed > 0 {
                    tracing::info!(transport = %self.name, conn_id = %conn.id, replayed, "replayed backlog to late joiner");
                }
            }
            members.push(conn);
            first
        };

        if became_active {
            self.state.set(ConnectionState::Connected, None);
        }
    }

    pub fn unsubscribe_websocket(&self, id: ConnectionId) {
        self.remove_members(&[id]);
    }

    /// Parse an inbound payload and forward events to subscribers.
    ///
    /// Frames lacking `type` or `sessionId` are logged and dropped. Control
    /// frames are handed back so the connection owner can answer them.
    pub async fn handle_message(&self, payload: impl Into<InboundPayload>) -> Option<ControlFrame> {
        match inbound::decode(payload.into()) {
            Ok(Inbound::Event(event)) => {
                let listeners = self.listeners.snapshot();
                deliver(&listeners, &event, &self.name).await;
                None
            }
            Ok(Inbound::Control(frame)) => Some(frame),
            Err(e) => {
                tracing::warn!(transport = %self.name, error = %e, "rejecting inbound message");
                None
            }
        }
    }

    fn remove_members(&self, ids: &[ConnectionId]) {
        let became_empty = {
            let mut members = lock(&self.members);
            let before = members.len();
            members.retain(|m| !ids.contains(&m.id));
            before > 0 && members.is_empty()
        };
        if became_empty {
            self.state.set(ConnectionState::Disconnected, None);
        }
    }
}

#[async_trait]
impl Transport for ServerTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> Result<()> {
        tracing::debug!(transport = %self.name, "server transport ready for members");
        Ok(())
    }

    async fn send(&self, event: &Event) -> Result<()> {
        let text = event.to_json()?;

        let members = {
            let members = lock(&self.members);
            if members.is_empty() && self.cfg.replay_backlog > 0 {
                let mut backlog = lock(&self.backlog);
                if backlog.len() >= self.cfg.replay_backlog {
                    backlog.pop_front();
                }
                backlog.push_back(text);
                return Ok(());
            }
            members.clone()
        };

        let mut dead = Vec::new();
        let mut delivered = 0usize;
        for conn in &members {
            match deliver_text(conn, &text) {
                Delivery::Sent => delivered += 1,
                Delivery::Dropped => {
                    tracing::warn!(transport = %self.name, conn_id = %conn.id, event_type = %event.event_type, "member queue full, event dropped");
                }
                Delivery::Dead => dead.push(conn.id),
            }
        }

        if !dead.is_empty() {
            tracing::debug!(transport = %self.name, pruned = dead.len(), "pruning closed members");
            self.remove_members(&dead);
        }

        tracing::trace!(transport = %self.name, delivered, event_type = %event.event_type, "broadcast");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let had_members = {
            let mut members = lock(&self.members);
            let had = !members.is_empty();
            members.clear();
            had
        };
        lock(&self.backlog).clear();
        if had_members {
            self.state.set(ConnectionState::Disconnected, None);
        }
        Ok(())
    }

    /// Ready with at least one member, or always when a replay backlog is
    /// configured.
    fn is_ready(&self) -> bool {
        self.cfg.replay_backlog > 0 || !lock(&self.members).is_empty()
    }

    fn on_event(&self, listener: Arc<dyn EventListener>) -> Subscription {
        self.listeners.subscribe(listener)
    }

    fn on_connection_change(&self, observer: ConnectionObserver) -> Subscription {
        self.state.subscribe(observer)
    }
}
