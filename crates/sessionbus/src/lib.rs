//! Top-level facade crate for sessionbus.
//!
//! Re-exports the protocol core and the hub/transport runtime so users can
//! depend on a single crate.

pub mod core {
    pub use sessionbus_core::*;
}

pub mod gateway {
    pub use sessionbus_gateway::*;
}
