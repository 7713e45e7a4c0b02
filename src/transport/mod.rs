//! Concrete [`engine::transport::Transport`] adapters. `spec.md` §4.2 / §9
//! "Dual-transport polymorphism".
//!
//! Both adapters live at the façade layer, outside `crates/engine`, so the
//! state machine never learns which one it is driving.

pub mod http_dual;
pub mod websocket;

pub use http_dual::{HttpDualChannel, PairingRegistry};
pub use websocket::WebSocketTransport;
