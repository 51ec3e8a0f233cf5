//! Built-in request handlers.

pub mod echo;

pub use echo::{Echo, EchoRoute, EchoService};
