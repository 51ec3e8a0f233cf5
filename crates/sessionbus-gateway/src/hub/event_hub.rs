use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;

use sessionbus_core::error::{Result, SessionBusError};
use sessionbus_core::Event;

use crate::config::HubConfig;
use crate::hub::listener::{deliver, same_listener, EventListener};
use crate::hub::registry::{lock, Subscription};
use crate::transport::{ConnectionChange, Transport};

/// Which events a listener receives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventFilter {
    /// Every event type.
    All,
    Type(String),
}

impl From<&str> for EventFilter {
    fn from(s: &str) -> Self {
        if s == "all" {
            EventFilter::All
        } else {
            EventFilter::Type(s.to_string())
        }
    }
}

impl From<String> for EventFilter {
    fn from(s: String) -> Self {
        EventFilter::from(s.as_str())
    }
}

/// Delivery scope of one `emit`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmitOptions {
    /// Skip transports.
    pub local_only: bool,
    /// Skip local listeners.
    pub transport_only: bool,
}

impl EmitOptions {
    pub fn local_only() -> Self {
        Self { local_only: true, transport_only: false }
    }

    pub fn transport_only() -> Self {
        Self { local_only: false, transport_only: true }
    }
}

/// Session-scoped router between local listeners and registered transports.
///
/// Outbound events go to local listeners (sequentially, in registration
/// order) and to every ready transport (concurrently). Inbound transport
/// events reach local listeners only, so a mesh of transports never echoes.
/// Cloning yields another handle to the same hub.
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

/// Non-owning hub reference.
#[derive(Clone)]
pub struct WeakEventHub {
    inner: Weak<HubInner>,
}

impl WeakEventHub {
    pub fn upgrade(&self) -> Option<EventHub> {
        self.inner.upgrade().map(|inner| EventHub { inner })
    }
}

struct ListenerEntry {
    id: u64,
    listener: Arc<dyn EventListener>,
}

struct TransportEntry {
    id: u64,
    transport: Arc<dyn Transport>,
    subscriptions: [Subscription; 2],
}

struct HubInner {
    session_id: String,
    debug: bool,
    next_id: AtomicU64,
    listeners: Mutex<HashMap<EventFilter, Vec<ListenerEntry>>>,
    transports: Mutex<Vec<TransportEntry>>,
}

impl EventHub {
    pub fn new(cfg: HubConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            inner: Arc::new(HubInner {
                session_id: cfg.session_id,
                debug: cfg.debug,
                next_id: AtomicU64::new(1),
                listeners: Mutex::new(HashMap::new()),
                transports: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn downgrade(&self) -> WeakEventHub {
        WeakEventHub {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Add a transport to the broadcast set and pipe its inbound events
    /// into the local-listener pipeline.
    pub fn register_transport(&self, transport: Arc<dyn Transport>) -> Subscription {
        let id = self.inner.next_id();
        let weak = Arc::downgrade(&self.inner);

        let inbound_hub = weak.clone();
        let inbound: Arc<dyn EventListener> = Arc::new(move |event: Event| {
            let hub = inbound_hub.clone();
            async move {
                if let Some(inner) = hub.upgrade() {
                    inner.dispatch_inbound(event).await;
                }
                Ok::<(), SessionBusError>(())
            }
        });
        let event_sub = transport.on_event(inbound);

        let session_id = self.inner.session_id.clone();
        let state_sub = transport.on_connection_change(Arc::new(move |change: &ConnectionChange| {
            match &change.error {
                Some(error) => tracing::warn!(
                    session_id = %session_id,
                    transport = %change.transport,
                    state = %change.state,
                    error = %error,
                    "transport connection changed"
                ),
                None => tracing::info!(
                    session_id = %session_id,
                    transport = %change.transport,
                    state = %change.state,
                    "transport connection changed"
                ),
            }
        }));

        if self.inner.debug {
            tracing::debug!(session_id = %self.inner.session_id, transport = transport.name(), "transport registered");
        }

        let subscriptions = [event_sub, state_sub];
        let handle_subs = subscriptions.clone();
        lock(&self.inner.transports).push(TransportEntry {
            id,
            transport,
            subscriptions,
        });

        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                lock(&inner.transports).retain(|t| t.id != id);
            }
            for sub in &handle_subs {
                sub.unsubscribe();
            }
        })
    }

    /// Register a listener for one type, or for every type with `"all"`.
    pub fn on(&self, filter: impl Into<EventFilter>, listener: Arc<dyn EventListener>) -> Subscription {
        let filter = filter.into();
        let id = self.inner.next_id();
        lock(&self.inner.listeners)
            .entry(filter.clone())
            .or_default()
            .push(ListenerEntry { id, listener });

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove_listeners(&filter, |e| e.id == id);
            }
        })
    }

    /// Remove every registration of `listener` under `filter`.
    pub fn off(&self, filter: impl Into<EventFilter>, listener: &Arc<dyn EventListener>) {
        self.inner
            .remove_listeners(&filter.into(), |e| same_listener(&e.listener, listener));
    }

    /// Emit to local listeners and every ready transport.
    pub async fn emit(&self, event: &Event) -> Result<()> {
        self.emit_with(event, EmitOptions::default()).await
    }

    /// Emit with an explicit delivery scope.
    ///
    /// Fails only on a session mismatch, before anything is delivered.
    /// Listener and transport failures are logged and contained.
    pub async fn emit_with(&self, event: &Event, opts: EmitOptions) -> Result<()> {
        if event.session_id != self.inner.session_id {
            return Err(SessionBusError::SessionMismatch {
                expected: self.inner.session_id.clone(),
                actual: event.session_id.clone(),
            });
        }

        if self.inner.debug {
            tracing::debug!(
                session_id = %self.inner.session_id,
                event_type = %event.event_type,
                event_id = %event.id,
                local_only = opts.local_only,
                transport_only = opts.transport_only,
                "emit"
            );
        }

        if !opts.transport_only {
            self.inner.deliver_local(event).await;
        }
        if !opts.local_only {
            self.inner.deliver_transports(event).await;
        }
        Ok(())
    }

    pub fn transport_count(&self) -> usize {
        lock(&self.inner.transports).len()
    }

    pub fn listener_count(&self, filter: impl Into<EventFilter>) -> usize {
        lock(&self.inner.listeners)
            .get(&filter.into())
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Drop every listener registration; transports are unaffected.
    pub fn clear_listeners(&self) {
        lock(&self.inner.listeners).clear();
    }

    /// Close every registered transport, then forget transports and
    /// listeners. A second call finds nothing to close.
    pub async fn close(&self) {
        let entries: Vec<TransportEntry> = std::mem::take(&mut *lock(&self.inner.transports));

        for entry in &entries {
            if let Err(e) = entry.transport.close().await {
                tracing::warn!(
                    session_id = %self.inner.session_id,
                    transport = entry.transport.name(),
                    error = %e,
                    "transport close failed"
                );
            }
            for sub in &entry.subscriptions {
                sub.unsubscribe();
            }
        }

        self.clear_listeners();
        if self.inner.debug {
            tracing::debug!(session_id = %self.inner.session_id, closed = entries.len(), "hub closed");
        }
    }
}

impl HubInner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn remove_listeners(&self, filter: &EventFilter, pred: impl Fn(&ListenerEntry) -> bool) {
        let mut listeners = lock(&self.listeners);
        if let Some(entries) = listeners.get_mut(filter) {
            entries.retain(|e| !pred(e));
            if entries.is_empty() {
                listeners.remove(filter);
            }
        }
    }

    /// Type-specific listeners first, then "all" listeners.
    fn snapshot_listeners(&self, event_type: &str) -> Vec<Arc<dyn EventListener>> {
        let listeners = lock(&self.listeners);
        let typed = listeners.get(&EventFilter::Type(event_type.to_string()));
        let all = listeners.get(&EventFilter::All);
        typed
            .into_iter()
            .chain(all)
            .flatten()
            .map(|e| Arc::clone(&e.listener))
            .collect()
    }

    async fn deliver_local(&self, event: &Event) {
        let listeners = self.snapshot_listeners(&event.event_type);
        let failed = deliver(&listeners, event, &self.session_id).await;
        if self.debug {
            tracing::debug!(
                session_id = %self.session_id,
                event_type = %event.event_type,
                listeners = listeners.len(),
                failed,
                "local delivery done"
            );
        }
    }

    async fn deliver_transports(&self, event: &Event) {
        let ready: Vec<Arc<dyn Transport>> = lock(&self.transports)
            .iter()
            .filter(|t| t.transport.is_ready())
            .map(|t| Arc::clone(&t.transport))
            .collect();

        let mut sends = FuturesUnordered::new();
        for transport in &ready {
            sends.push(async move { (transport.name(), transport.send(event).await) });
        }

        while let Some((name, res)) = sends.next().await {
            if let Err(e) = res {
                tracing::warn!(
                    session_id = %self.session_id,
                    transport = name,
                    event_type = %event.event_type,
                    error = %e,
                    "transport send failed"
                );
            }
        }
    }

    /// Inbound path: session check, then local listeners only.
    async fn dispatch_inbound(&self, event: Event) {
        if event.session_id != self.session_id {
            tracing::warn!(
                session_id = %self.session_id,
                event_session_id = %event.session_id,
                event_type = %event.event_type,
                "dropping inbound event for another session"
            );
            return;
        }
        if self.debug {
            tracing::debug!(session_id = %self.session_id, event_type = %event.event_type, "inbound");
        }
        self.deliver_local(&event).await;
    }
}
