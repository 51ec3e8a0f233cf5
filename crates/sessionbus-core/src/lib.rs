//! sessionbus core: transport-agnostic protocol primitives and error types.
//!
//! This crate defines the wire envelope, heartbeat control frames, RPC
//! payloads and the error surface shared by the hub, the transports and any
//! collaborator producing or consuming events. It carries no transport or
//! runtime dependencies so it can be reused on both ends of a connection.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! All fallible paths must surface as `SessionBusError`/`Result` so a
//! malformed frame never takes a process down.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{ErrorCode, Result, SessionBusError};
pub use protocol::event::Event;
