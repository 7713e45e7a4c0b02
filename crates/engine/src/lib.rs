//! ## Remote Desktop Gateway protocol engine
//!
//! Drives a single client connection through the MS-TSGU tunnel/channel
//! state machine (`spec.md` §4.3), consulting the authorizer contracts at
//! the points the protocol requires and, once `OPENED`, relaying bytes to
//! and from the backend RDP host.
//!
//! This crate owns no sockets of its own beyond the backend TCP connection
//! dialed after authorization; the client-facing transport is a capability
//! the caller supplies through the [`transport::Transport`] trait, so this
//! crate never knows whether it is talking to an HTTP dual-channel pair or
//! a WebSocket upgrade.

pub mod authorizer;
pub mod engine;
pub mod error;
pub mod pump;
pub mod session;
pub mod transport;

pub use engine::{EngineConfig, TunnelEngine};
pub use error::{Error, ErrorKind};
pub use session::{Claims, Session, SessionId, State};
