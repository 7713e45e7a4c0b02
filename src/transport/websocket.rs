//! WebSocket-upgrade transport. `spec.md` §4.2.
//!
//! One WebSocket binary message carries exactly one wire packet, header
//! included -- no reassembly buffer needed, unlike the HTTP dual-channel
//! adapter, since `axum`'s WebSocket already gives message boundaries.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::BytesMut;
use codec::{Packet, PacketHeader, HEADER_LEN};
use engine::transport::{Transport, TransportError};

pub struct WebSocketTransport {
    socket: WebSocket,
}

impl WebSocketTransport {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }

    fn decode_message(bytes: &[u8]) -> Result<Packet, TransportError> {
        if bytes.len() < HEADER_LEN {
            return Err(TransportError::Decode(codec::Error::Malformed(
                "websocket frame shorter than packet header",
            )));
        }

        let header = PacketHeader::decode(bytes).map_err(TransportError::Decode)?;
        let total = header.length as usize;
        if bytes.len() < total {
            return Err(TransportError::Decode(codec::Error::Malformed(
                "websocket frame shorter than declared packet length",
            )));
        }

        Packet::decode(&header, &bytes[HEADER_LEN..total]).map_err(TransportError::Decode)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn read_packet(&mut self) -> Result<Option<Packet>, TransportError> {
        loop {
            match self.socket.recv().await {
                Some(Ok(Message::Binary(bytes))) => return Self::decode_message(&bytes).map(Some),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                // axum answers Ping with Pong automatically; Text carries
                // nothing this protocol defines.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Text(_))) => continue,
                Some(Err(err)) => return Err(TransportError::Io(err.to_string())),
            }
        }
    }

    async fn write_packet(&mut self, packet: &Packet) -> Result<(), TransportError> {
        let mut buf = BytesMut::new();
        packet
            .encode(&mut buf)
            .map_err(|err| TransportError::Io(err.to_string()))?;

        self.socket
            .send(Message::Binary(buf.freeze()))
            .await
            .map_err(|err| TransportError::Io(err.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.socket.send(Message::Close(None)).await;
    }
}
