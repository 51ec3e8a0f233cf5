//! Correlation-based request/response over one event hub.
//!
//! A request is an event of the caller's request type whose `data` is
//! `{ requestId, data }`. Any event whose type ends in `.response` is
//! matched back to the pending call by `requestId`. Exactly one of
//! {response, timeout, send failure, shutdown} completes each call: the
//! path that removes the pending entry owns the completion.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use sessionbus_core::error::{Result, SessionBusError};
use sessionbus_core::protocol::rpc::{RpcRequest, RpcResponse};
use sessionbus_core::Event;

use crate::config::RequestOptions;
use crate::hub::{EventFilter, EventHub, Subscription, WeakEventHub};
use crate::rpc::route::RpcRoute;

/// Wait applied when a request does not set its own timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);

type Completion = oneshot::Sender<Result<Value>>;

/// Call/response idiom on top of an [`EventHub`]. Cheap to clone.
#[derive(Clone)]
pub struct RpcManager {
    inner: Arc<RpcInner>,
}

struct RpcInner {
    hub: WeakEventHub,
    session_id: String,
    default_timeout: Duration,
    pending: DashMap<String, Completion>,
    responses: Subscription,
}

impl Drop for RpcInner {
    fn drop(&mut self) {
        self.responses.unsubscribe();
    }
}

/// Removes the pending entry when the request future ends or is dropped.
struct PendingGuard<'a> {
    pending: &'a DashMap<String, Completion>,
    request_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.request_id);
    }
}

impl RpcManager {
    pub fn new(hub: &EventHub, session_id: impl Into<String>) -> Self {
        Self::with_timeout(hub, session_id, DEFAULT_TIMEOUT)
    }

    /// Subscribes once to the hub's "all" stream for `.response` events.
    pub fn with_timeout(hub: &EventHub, session_id: impl Into<String>, default_timeout: Duration) -> Self {
        let session_id = session_id.into();
        let inner = Arc::new_cyclic(|weak: &std::sync::Weak<RpcInner>| {
            let weak = weak.clone();
            let responses = hub.on(
                EventFilter::All,
                Arc::new(move |event: Event| {
                    let rpc = weak.clone();
                    async move {
                        if event.is_response() {
                            if let Some(inner) = rpc.upgrade() {
                                inner.handle_response(&event);
                            }
                        }
                        Ok::<(), SessionBusError>(())
                    }
                }),
            );
            RpcInner {
                hub: hub.downgrade(),
                session_id,
                default_timeout,
                pending: DashMap::new(),
                responses,
            }
        });
        Self { inner }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Emit `request_type` and wait for the correlated response.
    pub async fn request(&self, request_type: &str, data: Value, opts: RequestOptions) -> Result<Value> {
        let inner = &self.inner;
        let timeout = opts.timeout.unwrap_or(inner.default_timeout);
        let session_id = opts.session_id.unwrap_or_else(|| inner.session_id.clone());
        let request_id = Uuid::new_v4().to_string();

        let (tx, mut rx) = oneshot::channel();
        inner.pending.insert(request_id.clone(), tx);
        let _guard = PendingGuard {
            pending: &inner.pending,
            request_id: &request_id,
        };

        let hub = inner
            .hub
            .upgrade()
            .ok_or_else(|| SessionBusError::RpcSendFailed("event hub is gone".into()))?;
        let event = Event::new(
            request_type,
            session_id,
            RpcRequest {
                request_id: request_id.clone(),
                data,
            },
        )
        .into_untyped()
        .map_err(|e| SessionBusError::RpcSendFailed(e.to_string()))?;

        // The deadline covers the emit too: a stalled listener or transport
        // must not keep the call from settling.
        let deadline = Instant::now() + timeout;
        match tokio::time::timeout_at(deadline, hub.emit(&event)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(request_type, request_id = %request_id, error = %e, "request emit failed");
                return Err(SessionBusError::RpcSendFailed(e.to_string()));
            }
            Err(_) => {
                drop(hub);
                return self.settle_expired(request_type, &request_id, timeout, rx).await;
            }
        }
        drop(hub);

        match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(outcome) => outcome.unwrap_or(Err(SessionBusError::Shutdown)),
            Err(_) => self.settle_expired(request_type, &request_id, timeout, rx).await,
        }
    }

    /// Deadline passed: fail with a timeout unless a response already
    /// claimed the entry, in which case its outcome wins.
    async fn settle_expired(
        &self,
        request_type: &str,
        request_id: &str,
        timeout: Duration,
        rx: oneshot::Receiver<Result<Value>>,
    ) -> Result<Value> {
        if self.inner.pending.remove(request_id).is_some() {
            tracing::warn!(
                request_type,
                request_id,
                timeout_ms = timeout.as_millis() as u64,
                "request timed out"
            );
            return Err(SessionBusError::RpcTimeout {
                request_type: request_type.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        rx.await.unwrap_or(Err(SessionBusError::Shutdown))
    }

    /// Typed call over a named route.
    pub async fn call<R: RpcRoute>(&self, request: &R::Request, opts: RequestOptions) -> Result<R::Response> {
        let data = serde_json::to_value(request)
            .map_err(|e| SessionBusError::BadRequest(format!("{} encode failed: {e}", R::REQUEST)))?;
        let result = self.request(R::REQUEST, data, opts).await?;
        serde_json::from_value(result)
            .map_err(|e| SessionBusError::BadRequest(format!("{} invalid result: {e}", R::RESPONSE)))
    }

    /// Match a response event to its pending call.
    ///
    /// Unknown or stale correlation ids are logged and ignored.
    pub fn handle_response(&self, event: &Event) {
        self.inner.handle_response(event);
    }

    /// Emit the response for `request_id`.
    ///
    /// `response_type` must be what the requester listens for; the
    /// `.request`/`.response` pairing is a convention, not derived here.
    pub async fn respond(
        &self,
        request_id: &str,
        response_type: &str,
        session_id: &str,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<()> {
        let payload = match error {
            Some(error) => RpcResponse::failed(request_id, error),
            None => RpcResponse::ok(request_id, result),
        };
        let event = Event::new(response_type, session_id, payload).into_untyped()?;
        let hub = self
            .inner
            .hub
            .upgrade()
            .ok_or_else(|| SessionBusError::Internal("event hub is gone".into()))?;
        hub.emit(&event).await
    }

    /// Fail every pending call with a shutdown error.
    pub fn cleanup(&self) {
        let ids: Vec<String> = self.inner.pending.iter().map(|e| e.key().clone()).collect();
        let mut failed = 0usize;
        for id in ids {
            if let Some((_, tx)) = self.inner.pending.remove(&id) {
                let _ = tx.send(Err(SessionBusError::Shutdown));
                failed += 1;
            }
        }
        if failed > 0 {
            tracing::info!(session_id = %self.inner.session_id, failed, "pending requests failed on shutdown");
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }
}

impl RpcInner {
    fn handle_response(&self, event: &Event) {
        let response: RpcResponse = match event.data_as() {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(event_type = %event.event_type, error = %e, "ignoring malformed response");
                return;
            }
        };

        match self.pending.remove(&response.request_id) {
            Some((request_id, tx)) => {
                tracing::debug!(event_type = %event.event_type, request_id = %request_id, success = response.success, "response matched");
                let _ = tx.send(response.into_outcome());
            }
            None => {
                tracing::debug!(
                    event_type = %event.event_type,
                    request_id = %response.request_id,
                    "no pending request for response (stale or unknown)"
                );
            }
        }
    }
}
