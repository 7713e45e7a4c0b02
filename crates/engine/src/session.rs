//! Session data model. `spec.md` §3.
//!
//! A `Session` is single-owner: only the per-connection driver task that
//! owns it ever mutates it. There is deliberately no shared session table
//! here (contrast the teacher's `SessionManager`, which keys UDP/TCP
//! allocations by address because that protocol is connectionless) — see
//! `SPEC_FULL.md` §3.

use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use codec::caps::{Capabilities, RedirectFlags};
use tokio::net::TcpStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Initialized,
    Handshake,
    TunnelCreate,
    TunnelAuthorize,
    ChannelCreate,
    Opened,
    Closed,
}

/// Verified claims carried by a PAA token. `spec.md` §4.4 / §6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub remote_host: String,
    pub client_ip: IpAddr,
    pub user: String,
    pub exp: u64,
}

/// A unique, process-local identifier used only for logging and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

pub struct Session {
    pub id: SessionId,
    pub state: State,
    pub client_addr: SocketAddr,
    pub caps: Capabilities,
    pub idle_timeout: u64,
    pub redirect_flags: RedirectFlags,
    /// Set once, at `TUNNEL_CREATE`, and immutable afterwards except by a
    /// successful `REAUTH_MESSAGE` (`spec.md` §3 invariant (c), §4.3).
    pub claims: Option<Claims>,
    pub tunnel_id: Option<u32>,
    pub channel_id: Option<u32>,
    pub backend_addr: Option<SocketAddr>,
    pub backend: Option<TcpStream>,
    pub last_activity: Instant,
    /// Bytes relayed while `OPENED`, filled in by the pump once the session
    /// ends. `SPEC_FULL.md` §2 item 9's "bytes relayed" metric reads these.
    pub client_to_backend_bytes: u64,
    pub backend_to_client_bytes: u64,
}

impl Session {
    pub fn new(id: SessionId, client_addr: SocketAddr) -> Self {
        Self {
            id,
            state: State::Initialized,
            client_addr,
            caps: Capabilities::default(),
            idle_timeout: 0,
            redirect_flags: RedirectFlags::default(),
            claims: None,
            tunnel_id: None,
            channel_id: None,
            backend_addr: None,
            backend: None,
            last_activity: Instant::now(),
            client_to_backend_bytes: 0,
            backend_to_client_bytes: 0,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// `spec.md` §3 invariant (b): a session never has more than one
    /// backend connection.
    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }
}
