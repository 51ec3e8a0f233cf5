//! Request/response correlation over an event hub.

pub mod manager;
pub mod route;

pub use manager::{RpcManager, DEFAULT_TIMEOUT};
pub use route::RpcRoute;
