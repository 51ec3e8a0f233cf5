//! Wire protocol modules.
//!
//! - `event`: the JSON envelope every route shares, with a generic `data` slot.
//! - `control`: heartbeat frames (`ping`/`pong`) that never surface as events.
//! - `rpc`: correlation-tagged request/response payloads.
//! - `inbound`: decode-once classification of raw inbound payloads.
//!
//! Parsers are panic-free: malformed input is reported as `SessionBusError`.

pub mod control;
pub mod event;
pub mod inbound;
pub mod rpc;
