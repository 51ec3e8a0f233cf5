//! Per-session wiring: one hub, one server transport and one RPC manager
//! for every session id that has live sockets.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use sessionbus_core::error::Result;

use crate::config::{HubConfig, ServerTransportConfig};
use crate::dispatch::Dispatcher;
use crate::hub::{EventHub, Subscription};
use crate::rpc::RpcManager;
use crate::transport::{Connection, ServerTransport};

/// Everything the gateway holds for one session.
#[derive(Clone)]
pub struct SessionEntry {
    pub hub: EventHub,
    pub transport: Arc<ServerTransport>,
    pub rpc: RpcManager,
    subscriptions: Arc<Vec<Subscription>>,
}

impl SessionEntry {
    fn is_idle(&self) -> bool {
        self.transport.member_count() == 0 && self.transport.backlog_len() == 0
    }
}

/// Defaults applied to newly created sessions.
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    pub debug: bool,
    pub replay_backlog: usize,
    pub rpc_timeout: Duration,
}

pub struct SessionRegistry {
    sessions: DashMap<String, SessionEntry>,
    dispatcher: Arc<Dispatcher>,
    defaults: SessionDefaults,
}

impl SessionRegistry {
    pub fn new(dispatcher: Arc<Dispatcher>, defaults: SessionDefaults) -> Self {
        Self {
            sessions: DashMap::new(),
            dispatcher,
            defaults,
        }
    }

    pub fn get(&self, session_id: &str) -> Option<SessionEntry> {
        self.sessions.get(session_id).map(|e| e.value().clone())
    }

    pub fn get_or_create(&self, session_id: &str) -> Result<SessionEntry> {
        if let Some(entry) = self.sessions.get(session_id) {
            return Ok(entry.value().clone());
        }

        match self.sessions.entry(session_id.to_string()) {
            Entry::Occupied(o) => Ok(o.get().clone()),
            Entry::Vacant(v) => {
                let entry = self.build(session_id)?;
                tracing::info!(session_id, "session opened");
                Ok(v.insert(entry).value().clone())
            }
        }
    }

    /// Get or create the session and add `conn` as a member while holding
    /// the map entry, so a concurrent `release_if_idle` either sees the new
    /// member or finishes before the session is looked up.
    pub fn join(&self, session_id: &str, conn: Connection) -> Result<SessionEntry> {
        let entry = match self.sessions.entry(session_id.to_string()) {
            Entry::Occupied(o) => o.into_ref(),
            Entry::Vacant(v) => {
                let entry = self.build(session_id)?;
                tracing::info!(session_id, "session opened");
                v.insert(entry)
            }
        };
        entry.transport.subscribe_websocket(conn);
        Ok(entry.value().clone())
    }

    fn build(&self, session_id: &str) -> Result<SessionEntry> {
        let hub = EventHub::new(HubConfig {
            session_id: session_id.to_string(),
            debug: self.defaults.debug,
        })?;
        let transport = Arc::new(ServerTransport::new(ServerTransportConfig {
            session_id: session_id.to_string(),
            replay_backlog: self.defaults.replay_backlog,
        })?);
        let rpc = RpcManager::with_timeout(&hub, session_id, self.defaults.rpc_timeout);

        let mut subscriptions = vec![hub.register_transport(transport.clone())];
        subscriptions.extend(self.dispatcher.bind(&hub, &rpc));

        Ok(SessionEntry {
            hub,
            transport,
            rpc,
            subscriptions: Arc::new(subscriptions),
        })
    }

    /// Tear the session down once it has no members and nothing buffered.
    /// Returns whether it was removed.
    pub async fn release_if_idle(&self, session_id: &str) -> bool {
        let Some((_, entry)) = self.sessions.remove_if(session_id, |_, e| e.is_idle()) else {
            return false;
        };

        entry.rpc.cleanup();
        entry.hub.close().await;
        for sub in entry.subscriptions.iter() {
            sub.unsubscribe();
        }
        tracing::info!(session_id, "session closed");
        true
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
