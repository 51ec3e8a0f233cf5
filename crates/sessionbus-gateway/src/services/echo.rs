use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use sessionbus_core::error::Result;

use crate::dispatch::{RequestCtx, RequestHandler};
use crate::rpc::RpcRoute;

/// Answers `system.echo.request` with the request data unchanged.
/// Useful to prove the request/response path end to end.
pub struct EchoService;

#[async_trait]
impl RequestHandler for EchoService {
    fn request_type(&self) -> &'static str {
        EchoRoute::REQUEST
    }

    async fn handle(&self, ctx: RequestCtx, data: Value) -> Result<Value> {
        tracing::debug!(session_id = %ctx.session_id, request_id = %ctx.request_id, "echo");
        Ok(data)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Echo {
    pub message: String,
}

/// Typed route for [`EchoService`].
pub struct EchoRoute;

impl RpcRoute for EchoRoute {
    const REQUEST: &'static str = "system.echo.request";
    const RESPONSE: &'static str = "system.echo.response";
    type Request = Echo;
    type Response = Echo;
}
