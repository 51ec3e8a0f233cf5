//! Transport layer.
//!
//! The [`Transport`] contract plus its two implementations: a reconnecting
//! client socket and a server-side fan-out group fed by the gateway's
//! WebSocket handler.

pub mod client;
pub mod codec;
pub mod contract;
pub mod server;
pub mod ws;

pub use client::ClientTransport;
pub use contract::{ConnectionChange, ConnectionObserver, ConnectionState, ConnectionTracker, Transport};
pub use server::{Connection, ConnectionId, ServerTransport};
