//! The fixed 8 byte packet header shared by every gateway packet.
//!
//! `spec.md` §4.1 / §6: version (1 byte, must be `0`), reserved (1 byte,
//! must be `0`), packet type (`u16` LE), reserved (`u16`), packet length
//! including the header itself (`u32` LE).

use bytes::{Buf, BufMut, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::Error;

pub const HEADER_LEN: usize = 8;
pub const PROTOCOL_VERSION: u8 = 0;

/// `spec.md` §6 packet type constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum PacketType {
    HandshakeRequest = 0x01,
    HandshakeResponse = 0x02,
    ExtendedAuthMessage = 0x03,
    TunnelCreate = 0x04,
    TunnelResponse = 0x05,
    TunnelAuth = 0x06,
    TunnelAuthResponse = 0x07,
    ChannelCreate = 0x08,
    ChannelResponse = 0x09,
    Data = 0x0A,
    ServiceMessage = 0x0B,
    ReauthMessage = 0x0C,
    Keepalive = 0x0D,
    CloseChannel = 0x10,
    CloseChannelResponse = 0x11,
}

#[derive(Debug, Clone, Copy)]
pub struct PacketHeader {
    pub packet_type: PacketType,
    /// Total packet length, header included.
    pub length: u32,
}

impl PacketHeader {
    /// Parses the 8 byte header from the front of `bytes`.
    ///
    /// Unknown packet types are reported via [`Error::UnsupportedPacket`]
    /// rather than [`Error::Malformed`] -- the header itself was
    /// well-formed, the type just isn't one this codec understands.
    ///
    /// ```
    /// use rdg_gateway_codec::header::{PacketHeader, PacketType};
    ///
    /// let buf = [0u8, 0, 0x01, 0, 0, 0, 8, 0, 0, 0];
    /// let header = PacketHeader::decode(&buf).unwrap();
    /// assert_eq!(header.packet_type, PacketType::HandshakeRequest);
    /// assert_eq!(header.length, 8);
    /// ```
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::Malformed("buffer shorter than header"));
        }

        let mut buf = bytes;
        let version = buf.get_u8();
        let _reserved = buf.get_u8();
        let raw_type = buf.get_u16_le();
        let _reserved = buf.get_u16_le();
        let length = buf.get_u32_le();

        if version != PROTOCOL_VERSION {
            return Err(Error::Malformed("unsupported protocol version"));
        }

        if (length as usize) < HEADER_LEN {
            return Err(Error::Malformed("length field shorter than header"));
        }

        let packet_type =
            PacketType::try_from(raw_type).map_err(|_| Error::UnsupportedPacket(raw_type))?;

        Ok(Self {
            packet_type,
            length,
        })
    }

    pub fn encode(&self, bytes: &mut BytesMut) {
        bytes.put_u8(PROTOCOL_VERSION);
        bytes.put_u8(0);
        bytes.put_u16_le(self.packet_type.into());
        bytes.put_u16_le(0);
        bytes.put_u32_le(self.length);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_length_field() {
        let buf = [0u8, 0, 0x01, 0, 0, 0, 4, 0, 0, 0];
        assert!(matches!(
            PacketHeader::decode(&buf),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn rejects_unknown_type() {
        let buf = [0u8, 0, 0xFF, 0xFF, 0, 0, 8, 0, 0, 0];
        assert!(matches!(
            PacketHeader::decode(&buf),
            Err(Error::UnsupportedPacket(0xFFFF))
        ));
    }

    #[test]
    fn rejects_short_buffer() {
        let buf = [0u8, 0, 0x01];
        assert!(matches!(
            PacketHeader::decode(&buf),
            Err(Error::Malformed(_))
        ));
    }
}
