//! Transport capability. `spec.md` §4.2 / §9 "Dual-transport polymorphism".
//!
//! The engine never branches on transport kind: it only ever sees this
//! trait. The HTTP dual-channel adapter and the WebSocket/upgrade adapter
//! both implement it at the façade layer (binary crate), outside this
//! crate, so that adding a third transport never touches the state
//! machine.

use async_trait::async_trait;
use codec::Packet;

#[derive(Debug)]
pub enum TransportError {
    /// The peer closed the connection, or the partner of an HTTP
    /// dual-channel pair never arrived within the pairing window.
    Closed(String),
    Io(String),
    /// Bytes arrived but did not decode to a well-formed packet. Kept
    /// distinct from `Io` so the engine can surface `ErrorKind::Malformed`
    /// (or `UnsupportedPacket`) instead of a generic transport failure.
    Decode(codec::Error),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed(reason) => write!(f, "transport closed: {reason}"),
            Self::Io(reason) => write!(f, "transport io error: {reason}"),
            Self::Decode(err) => write!(f, "transport decode error: {err}"),
        }
    }
}

impl std::error::Error for TransportError {}

#[async_trait]
pub trait Transport: Send {
    /// Reads the next packet. `Ok(None)` signals a clean end of stream.
    async fn read_packet(&mut self) -> Result<Option<Packet>, TransportError>;

    async fn write_packet(&mut self, packet: &Packet) -> Result<(), TransportError>;

    /// Scoped release: shuts down any backing sockets and flushes pending
    /// writes up to a short grace window. Must never leak sockets on error
    /// paths (`spec.md` §4.2).
    async fn close(&mut self);
}
