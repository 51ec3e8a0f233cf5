//! Reconnecting client socket transport.
//!
//! Lifecycle:
//! - `initialize` makes the first connect attempt; concurrent attempts are no-ops
//! - on open: attempts reset, queued events flushed in order, heartbeat armed
//! - on error/close: heartbeat stopped, reconnect scheduled with
//!   `reconnect_delay * 2^(k-1)` backoff until `max_reconnect_attempts`
//! - `close` disables reconnect, cancels timers and discards the queue

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use sessionbus_core::error::{Result, SessionBusError};
use sessionbus_core::protocol::control::ControlFrame;
use sessionbus_core::protocol::inbound::{self, Inbound, InboundPayload};
use sessionbus_core::Event;

use crate::config::ClientTransportConfig;
use crate::hub::listener::{deliver, EventListener};
use crate::hub::registry::{lock, Registry, Subscription};
use crate::transport::contract::{ConnectionObserver, ConnectionState, ConnectionTracker, Transport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Grace period for the closing handshake before the socket task is aborted.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Delay before reconnect attempt `attempt` (1-indexed).
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.checked_mul(factor).unwrap_or(Duration::MAX)
}

/// Hand queued events to `send` in order.
///
/// Stops at the first failure and puts that event back at the front, so the
/// unsent remainder keeps its order and nothing already handed off is sent
/// twice. Returns how many events were handed off.
pub(crate) fn flush_queue<F>(queue: &mut VecDeque<Event>, mut send: F) -> usize
where
    F: FnMut(&Event) -> Result<()>,
{
    let mut sent = 0;
    while let Some(event) = queue.pop_front() {
        if let Err(e) = send(&event) {
            tracing::warn!(event_type = %event.event_type, error = %e, remaining = queue.len() + 1, "flush interrupted");
            queue.push_front(event);
            break;
        }
        sent += 1;
    }
    sent
}

/// Client-initiated persistent socket implementing the transport contract.
pub struct ClientTransport {
    inner: Arc<ClientInner>,
}

#[derive(Default)]
struct Outbound {
    /// Writer channel of the live connection.
    tx: Option<mpsc::UnboundedSender<Message>>,
    /// Events accepted while disconnected.
    queue: VecDeque<Event>,
}

#[derive(Default)]
struct Timers {
    reconnect: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    socket: Option<JoinHandle<()>>,
}

struct ClientInner {
    cfg: ClientTransportConfig,
    name: String,
    state: ConnectionTracker,
    listeners: Arc<Registry<Arc<dyn EventListener>>>,
    auto_reconnect: AtomicBool,
    closed: AtomicBool,
    attempts: AtomicU32,
    /// Bumped per connection and on close; stale socket tasks compare it.
    epoch: AtomicU64,
    outbound: Mutex<Outbound>,
    timers: Mutex<Timers>,
}

impl ClientTransport {
    pub fn new(cfg: ClientTransportConfig) -> Result<Self> {
        cfg.validate()?;
        let name = format!("client:{}", cfg.session_id);
        Ok(Self {
            inner: Arc::new(ClientInner {
                auto_reconnect: AtomicBool::new(cfg.auto_reconnect),
                state: ConnectionTracker::new(name.clone()),
                name,
                cfg,
                listeners: Registry::new(),
                closed: AtomicBool::new(false),
                attempts: AtomicU32::new(0),
                epoch: AtomicU64::new(0),
                outbound: Mutex::new(Outbound::default()),
                timers: Mutex::new(Timers::default()),
            }),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    /// Events waiting for a connection.
    pub fn queued(&self) -> usize {
        lock(&self.inner.outbound).queue.len()
    }

    /// Reconnect attempts made since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ClientTransport {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn initialize(&self) -> Result<()> {
        self.inner.closed.store(false, Ordering::SeqCst);
        self.inner.attempts.store(0, Ordering::SeqCst);
        self.inner
            .auto_reconnect
            .store(self.inner.cfg.auto_reconnect, Ordering::SeqCst);
        Arc::clone(&self.inner).connect().await;
        Ok(())
    }

    async fn send(&self, event: &Event) -> Result<()> {
        let mut out = lock(&self.inner.outbound);

        // The writer slot is filled only after the queue has been flushed,
        // so direct sends can never overtake queued events.
        if let Some(tx) = &out.tx {
            let text = event.to_json()?;
            if tx.send(Message::Text(text)).is_ok() {
                return Ok(());
            }
            out.tx = None;
        }

        if self.inner.auto_reconnect.load(Ordering::SeqCst) {
            out.queue.push_back(event.clone());
            tracing::debug!(
                transport = %self.inner.name,
                event_type = %event.event_type,
                queued = out.queue.len(),
                "not connected, event queued"
            );
            return Ok(());
        }

        Err(SessionBusError::NotConnected(format!(
            "{} is not connected and auto-reconnect is off",
            self.inner.name
        )))
    }

    async fn close(&self) -> Result<()> {
        let inner = &self.inner;
        inner.closed.store(true, Ordering::SeqCst);
        inner.auto_reconnect.store(false, Ordering::SeqCst);
        inner.epoch.fetch_add(1, Ordering::SeqCst);

        let timers = std::mem::take(&mut *lock(&inner.timers));
        if let Some(h) = timers.reconnect {
            h.abort();
        }
        if let Some(h) = timers.heartbeat {
            h.abort();
        }

        let discarded = {
            let mut out = lock(&inner.outbound);
            // Dropping the writer channel makes the socket task send a close frame.
            out.tx = None;
            let n = out.queue.len();
            out.queue.clear();
            n
        };
        if discarded > 0 {
            tracing::info!(transport = %inner.name, discarded, "queued events discarded on close");
        }

        if let Some(mut socket) = timers.socket {
            if tokio::time::timeout(CLOSE_GRACE, &mut socket).await.is_err() {
                socket.abort();
            }
        }

        inner.state.set(ConnectionState::Disconnected, None);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.inner.state.get() == ConnectionState::Connected
            && lock(&self.inner.outbound).tx.is_some()
    }

    fn on_event(&self, listener: Arc<dyn EventListener>) -> Subscription {
        self.inner.listeners.subscribe(listener)
    }

    fn on_connection_change(&self, observer: ConnectionObserver) -> Subscription {
        self.inner.state.subscribe(observer)
    }
}

impl Drop for ClientTransport {
    fn drop(&mut self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.auto_reconnect.store(false, Ordering::SeqCst);
        let timers = std::mem::take(&mut *lock(&self.inner.timers));
        for h in [timers.reconnect, timers.heartbeat, timers.socket].into_iter().flatten() {
            h.abort();
        }
    }
}

impl ClientInner {
    async fn connect(self: Arc<Self>) {
        if !self.state.begin_connecting() {
            tracing::debug!(transport = %self.name, "connect skipped, already connecting or connected");
            return;
        }

        tracing::info!(transport = %self.name, url = %self.cfg.url, "connecting");
        match connect_async(self.cfg.url.as_str()).await {
            Ok((ws, _)) => {
                if self.closed.load(Ordering::SeqCst) {
                    tracing::debug!(transport = %self.name, "closed while connecting, dropping socket");
                    self.state.set(ConnectionState::Disconnected, None);
                    return;
                }
                self.on_open(ws);
            }
            Err(e) => {
                if self.closed.load(Ordering::SeqCst) {
                    self.state.set(ConnectionState::Disconnected, None);
                    return;
                }
                self.state.set(ConnectionState::Error, Some(format!("connect failed: {e}")));
                self.schedule_reconnect();
            }
        }
    }

    fn reconnect(self: Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(self.connect())
    }

    fn on_open(self: &Arc<Self>, ws: WsStream) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel::<Message>();

        let flushed = {
            let mut out = lock(&self.outbound);
            // `close` may have run since the connect resolved.
            if self.closed.load(Ordering::SeqCst) {
                drop(out);
                tracing::debug!(transport = %self.name, "closed while opening, dropping socket");
                self.state.set(ConnectionState::Disconnected, None);
                return;
            }
            let Outbound { tx: slot, queue } = &mut *out;
            let flushed = flush_queue(queue, |event| {
                let text = event.to_json()?;
                tx.send(Message::Text(text))
                    .map_err(|_| SessionBusError::NotConnected("socket writer gone".into()))
            });
            *slot = Some(tx);
            flushed
        };

        self.attempts.store(0, Ordering::SeqCst);
        self.state.set(ConnectionState::Connected, None);
        tracing::info!(transport = %self.name, flushed, "connected");

        let socket = tokio::spawn(Arc::clone(self).run_socket(ws, rx, epoch));
        let heartbeat = self.spawn_heartbeat();

        let mut timers = lock(&self.timers);
        // `close` sets `closed` before taking the timers, so a close that
        // already drained them is visible here.
        if self.closed.load(Ordering::SeqCst) {
            drop(timers);
            socket.abort();
            heartbeat.abort();
            lock(&self.outbound).tx = None;
            self.state.set(ConnectionState::Disconnected, None);
            return;
        }
        if let Some(prev) = timers.socket.replace(socket) {
            prev.abort();
        }
        if let Some(prev) = timers.heartbeat.replace(heartbeat) {
            prev.abort();
        }
    }

    async fn run_socket(self: Arc<Self>, ws: WsStream, mut rx: mpsc::UnboundedReceiver<Message>, epoch: u64) {
        let (mut ws_tx, mut ws_rx) = ws.split();
        let mut error: Option<String> = None;

        loop {
            tokio::select! {
                out = rx.recv() => {
                    match out {
                        Some(msg) => {
                            if let Err(e) = ws_tx.send(msg).await {
                                error = Some(format!("write failed: {e}"));
                                break;
                            }
                        }
                        None => {
                            let _ = ws_tx.close().await;
                            break;
                        }
                    }
                }

                incoming = ws_rx.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => self.handle_frame(InboundPayload::Text(text)).await,
                        Some(Ok(Message::Binary(bin))) => self.handle_frame(InboundPayload::Binary(Bytes::from(bin))).await,
                        Some(Ok(Message::Close(_))) | None => break,
                        // socket-level ping/pong is answered by tungstenite
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error = Some(format!("read failed: {e}"));
                            break;
                        }
                    }
                }
            }
        }

        self.on_connection_lost(epoch, error);
    }

    async fn handle_frame(&self, payload: InboundPayload) {
        match inbound::decode(payload) {
            Ok(Inbound::Control(ControlFrame::Pong { .. })) => {
                tracing::trace!(transport = %self.name, "heartbeat acknowledged");
            }
            Ok(Inbound::Control(ControlFrame::Ping { .. })) => {
                if let Ok(frame) = ControlFrame::pong().to_json() {
                    self.push_raw(Message::Text(frame));
                }
            }
            Ok(Inbound::Event(event)) => {
                let listeners = self.listeners.snapshot();
                deliver(&listeners, &event, &self.name).await;
            }
            Err(e) => {
                tracing::warn!(transport = %self.name, error = %e, "dropping malformed frame");
            }
        }
    }

    fn push_raw(&self, msg: Message) -> bool {
        lock(&self.outbound)
            .tx
            .as_ref()
            .map(|tx| tx.send(msg).is_ok())
            .unwrap_or(false)
    }

    fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let every = self.cfg.ping_interval();
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval_at(Instant::now() + every, every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                match ControlFrame::ping().to_json() {
                    Ok(frame) => {
                        if !inner.push_raw(Message::Text(frame)) {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(transport = %inner.name, error = %e, "heartbeat encode failed"),
                }
            }
        })
    }

    fn on_connection_lost(self: &Arc<Self>, epoch: u64, error: Option<String>) {
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return;
        }

        if let Some(h) = lock(&self.timers).heartbeat.take() {
            h.abort();
        }
        lock(&self.outbound).tx = None;

        match error {
            Some(e) => {
                self.state.set(ConnectionState::Error, Some(e));
            }
            None => {
                tracing::info!(transport = %self.name, "connection closed");
                self.state.set(ConnectionState::Disconnected, None);
            }
        }
        self.schedule_reconnect();
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        if !self.auto_reconnect.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst) {
            return;
        }

        let max = self.cfg.max_reconnect_attempts;
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > max {
            self.attempts.store(max, Ordering::SeqCst);
            // Nothing will flush the queue any more; further sends fail
            // until `initialize` re-arms reconnecting.
            self.auto_reconnect.store(false, Ordering::SeqCst);
            tracing::warn!(
                transport = %self.name,
                max_attempts = max,
                queued = lock(&self.outbound).queue.len(),
                "giving up on reconnect"
            );
            self.state.set(
                ConnectionState::Error,
                Some(format!("reconnect attempts exhausted after {max} tries")),
            );
            return;
        }

        let delay = backoff_delay(self.cfg.reconnect_delay(), attempt);
        tracing::info!(
            transport = %self.name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );

        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.reconnect().await;
        });
        if let Some(prev) = lock(&self.timers).reconnect.replace(handle) {
            prev.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn backoff_doubles_from_base() {
        let base = Duration::from_millis(1000);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(4000));
        assert_eq!(backoff_delay(base, 5), Duration::from_millis(16000));
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        assert_eq!(backoff_delay(Duration::from_secs(1), 200), Duration::MAX);
    }

    fn queue_of(n: usize) -> VecDeque<Event> {
        (0..n)
            .map(|i| Event::new("note.added", "s-1", json!({ "n": i })))
            .collect()
    }

    #[test]
    fn flush_hands_off_everything_in_order() {
        let mut queue = queue_of(3);
        let mut seen = Vec::new();
        let sent = flush_queue(&mut queue, |ev| {
            seen.push(ev.data["n"].as_u64().unwrap());
            Ok(())
        });
        assert_eq!(sent, 3);
        assert_eq!(seen, vec![0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn open_resolving_after_close_leaves_no_live_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let _ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        let (ws, _) = connect_async(url.as_str()).await.unwrap();

        let client = ClientTransport::new(ClientTransportConfig::new(url, "s-1")).unwrap();
        client.close().await.unwrap();
        client.inner.on_open(ws);

        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.is_ready());
        {
            let timers = lock(&client.inner.timers);
            assert!(timers.socket.is_none());
            assert!(timers.heartbeat.is_none());
        }
        server.abort();
    }

    #[test]
    fn flush_failure_keeps_unsent_tail_without_redelivery() {
        let mut queue = queue_of(4);
        let mut calls = 0;
        let sent = flush_queue(&mut queue, |_| {
            calls += 1;
            if calls == 3 {
                Err(SessionBusError::NotConnected("gone".into()))
            } else {
                Ok(())
            }
        });
        assert_eq!(sent, 2);
        let left: Vec<u64> = queue.iter().map(|e| e.data["n"].as_u64().unwrap()).collect();
        assert_eq!(left, vec![2, 3]);
    }
}
