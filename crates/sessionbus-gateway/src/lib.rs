//! Session bus gateway library entry.
//!
//! Wires the event hub, the transports, the RPC layer and the built-in
//! request handlers into a gateway stack. Consumed by the binary
//! (`main.rs`), by embedding applications and by integration tests.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod app_state;
pub mod config;
pub mod dispatch;
pub mod hub;
pub mod ops;
pub mod router;
pub mod rpc;
pub mod services;
pub mod sessions;
pub mod transport;
