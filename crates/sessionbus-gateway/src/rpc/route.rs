use serde::de::DeserializeOwned;
use serde::Serialize;

/// A named request/response pair with its payload types.
///
/// Pushes payload typing down to the route while the hub keeps moving
/// untyped envelopes.
pub trait RpcRoute {
    const REQUEST: &'static str;
    const RESPONSE: &'static str;
    type Request: Serialize + Send + Sync;
    type Response: DeserializeOwned;
}
