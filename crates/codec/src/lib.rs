//! ## Remote Desktop Gateway wire codec
//!
//! Encodes and decodes the MS-TSGU framed packets exchanged between an RDP
//! client and the gateway: the fixed 8 byte packet header, the
//! packet-type-specific bodies, and the length-prefixed UTF-16LE strings and
//! TLV-style substructures those bodies carry.
//!
//! This crate knows nothing about sessions, authorization, or transport; it
//! is a pure `bytes -> Packet` / `Packet -> bytes` codec.

pub mod caps;
pub mod header;
pub mod packet;
pub mod wire;

pub use header::{HEADER_LEN, PacketHeader, PacketType};
pub use packet::Packet;

/// Maximum permitted body size, enforced on both decode and encode.
///
/// `spec.md` §8 boundary behaviors: 64 KiB.
pub const MAX_BODY_LEN: usize = 64 * 1024;

#[derive(Debug)]
pub enum Error {
    /// Header length field declared less than [`HEADER_LEN`], or the
    /// declared length did not match the bytes actually present.
    Malformed(&'static str),
    /// A string field was not valid UTF-16LE.
    InvalidString,
    /// A list count in the body exceeded the remaining bytes.
    TruncatedList,
    /// Declared or actual body length exceeded [`MAX_BODY_LEN`].
    BodyTooLarge,
    /// Header parsed fine but the packet type isn't one we know.
    UnsupportedPacket(u16),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(why) => write!(f, "malformed packet: {why}"),
            Self::InvalidString => write!(f, "field is not valid utf-16le"),
            Self::TruncatedList => write!(f, "list count exceeds remaining bytes"),
            Self::BodyTooLarge => write!(f, "body exceeds {MAX_BODY_LEN} bytes"),
            Self::UnsupportedPacket(ty) => write!(f, "unsupported packet type: 0x{ty:02x}"),
        }
    }
}
