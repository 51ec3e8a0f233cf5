use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use sessionbus_core::error::Result;
use sessionbus_core::protocol::event::response_type_for;
use sessionbus_core::protocol::rpc::RpcRequest;
use sessionbus_core::Event;

use crate::hub::{EventHub, Subscription};
use crate::rpc::RpcManager;

/// Per-request context passed to handlers.
#[derive(Debug, Clone)]
pub struct RequestCtx {
    pub session_id: String,
    pub request_id: String,
    pub event_id: String,
}

/// Server-side handler for one request type.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    fn request_type(&self) -> &'static str;

    /// Type the requester listens for; defaults to the `.response` twin.
    fn response_type(&self) -> String {
        response_type_for(self.request_type())
    }

    async fn handle(&self, ctx: RequestCtx, data: Value) -> Result<Value>;
}

/// Registry of request handlers, bound onto a hub per session.
#[derive(Default)]
pub struct Dispatcher {
    handlers: DashMap<&'static str, Arc<dyn RequestHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    pub fn register(&self, handler: Arc<dyn RequestHandler>) {
        self.handlers.insert(handler.request_type(), handler);
    }

    pub fn registered_types(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|e| *e.key()).collect()
    }

    /// Subscribe every handler to its request type on `hub`, answering
    /// through `rpc`. Handler errors become failure responses.
    pub fn bind(&self, hub: &EventHub, rpc: &RpcManager) -> Vec<Subscription> {
        self.handlers
            .iter()
            .map(|entry| {
                let handler = Arc::clone(entry.value());
                let rpc = rpc.clone();
                let request_type = *entry.key();
                hub.on(
                    request_type,
                    Arc::new(move |event: Event| {
                        let handler = Arc::clone(&handler);
                        let rpc = rpc.clone();
                        async move { serve(handler.as_ref(), &rpc, event).await }
                    }),
                )
            })
            .collect()
    }
}

fn request_ctx(event: &Event) -> Result<(RequestCtx, Value)> {
    let req: RpcRequest = event.data_as()?;
    let ctx = RequestCtx {
        session_id: event.session_id.clone(),
        request_id: req.request_id,
        event_id: event.id.clone(),
    };
    Ok((ctx, req.data))
}

async fn serve(handler: &dyn RequestHandler, rpc: &RpcManager, event: Event) -> Result<()> {
    let (ctx, data) = request_ctx(&event)?;
    let response_type = handler.response_type();

    match handler.handle(ctx.clone(), data).await {
        Ok(result) => {
            rpc.respond(&ctx.request_id, &response_type, &ctx.session_id, Some(result), None)
                .await
        }
        Err(e) => {
            tracing::debug!(request_type = handler.request_type(), request_id = %ctx.request_id, error = %e, "handler failed");
            rpc.respond(&ctx.request_id, &response_type, &ctx.session_id, None, Some(e.to_string()))
                .await
        }
    }
}
