//! Event hub: session-scoped routing between local listeners and transports.

pub mod event_hub;
pub mod listener;
pub mod registry;

pub use event_hub::{EmitOptions, EventFilter, EventHub, WeakEventHub};
pub use listener::EventListener;
pub use registry::Subscription;
