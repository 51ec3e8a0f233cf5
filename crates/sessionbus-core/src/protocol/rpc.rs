//! RPC payloads carried in the `data` slot of request/response events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SessionBusError};

/// Request payload: the caller's data tagged with a correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(bound(deserialize = "T: Deserialize<'de> + Default"))]
pub struct RpcRequest<T = Value> {
    pub request_id: String,
    #[serde(default)]
    pub data: T,
}

/// Response payload matched back to a pending call by `request_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcResponse<T = Value> {
    pub request_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> RpcResponse<T> {
    pub fn ok(request_id: impl Into<String>, result: Option<T>) -> Self {
        Self {
            request_id: request_id.into(),
            success: true,
            result,
            error: None,
        }
    }

    pub fn failed(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

impl RpcResponse<Value> {
    /// Collapse into the caller-facing outcome.
    ///
    /// A success without `result` yields `Value::Null`; a failure without
    /// `error` still fails, with a generic message.
    pub fn into_outcome(self) -> Result<Value> {
        if self.success {
            Ok(self.result.unwrap_or(Value::Null))
        } else {
            Err(SessionBusError::RpcRemote(
                self.error.unwrap_or_else(|| "request failed".to_string()),
            ))
        }
    }
}
