//! Packet bodies and the `Packet` tagged union.
//!
//! `spec.md` §3 / §6. Every variant round-trips through [`Packet::encode`] /
//! [`Packet::decode`]; unknown presence bits inside a body are read but
//! never rejected (forward compatibility, `spec.md` §4.1).

use bytes::{Buf, BufMut, BytesMut};

use crate::{
    Error, HEADER_LEN, MAX_BODY_LEN, PacketHeader, PacketType,
    caps::{Capabilities, ExtendedAuthFlags, RedirectFlags, presence},
    wire::{read_blob, read_string, read_string_list, write_blob, write_string, write_string_list},
};

/// `0` - no error.
pub const ERROR_SUCCESS: u32 = 0x0000_0000;
/// Access to the requested host was denied by host-selection policy.
pub const E_ACCESSDENIED: u32 = 0x8007_0005;
/// Catch-all failure (backend dial failure, internal error) where the
/// protocol only requires *some* non-zero error code.
pub const E_FAIL: u32 = 0x8000_4005;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub version: u8,
    pub extended_auth_requested: ExtendedAuthFlags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub error_code: u32,
    pub extended_auth_supported: ExtendedAuthFlags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedAuthMessage {
    pub blob: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TunnelCreate {
    pub presence: u32,
    pub paa_cookie: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TunnelResponse {
    pub presence: u32,
    pub error_code: u32,
    pub tunnel_id: Option<u32>,
    pub caps: Option<Capabilities>,
    pub soh_request: Option<Vec<u8>>,
    pub consent_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelAuth {
    pub client_machine_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TunnelAuthResponse {
    pub presence: u32,
    pub error_code: u32,
    pub redirect_flags: Option<RedirectFlags>,
    pub idle_timeout: Option<u32>,
    pub soh_response: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelCreate {
    pub resource_names: Vec<String>,
    pub protocol: u16,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelResponse {
    pub presence: u32,
    pub error_code: u32,
    pub channel_id: Option<u32>,
    pub auth_cookie: Option<Vec<u8>>,
    pub udp_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceMessage {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReauthMessage {
    pub paa_cookie: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseChannel {
    pub reason: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseChannelResponse {
    pub error_code: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    HandshakeRequest(HandshakeRequest),
    HandshakeResponse(HandshakeResponse),
    ExtendedAuthMessage(ExtendedAuthMessage),
    TunnelCreate(TunnelCreate),
    TunnelResponse(TunnelResponse),
    TunnelAuth(TunnelAuth),
    TunnelAuthResponse(TunnelAuthResponse),
    ChannelCreate(ChannelCreate),
    ChannelResponse(ChannelResponse),
    Data(Data),
    ServiceMessage(ServiceMessage),
    ReauthMessage(ReauthMessage),
    Keepalive,
    CloseChannel(CloseChannel),
    CloseChannelResponse(CloseChannelResponse),
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::HandshakeRequest(_) => PacketType::HandshakeRequest,
            Self::HandshakeResponse(_) => PacketType::HandshakeResponse,
            Self::ExtendedAuthMessage(_) => PacketType::ExtendedAuthMessage,
            Self::TunnelCreate(_) => PacketType::TunnelCreate,
            Self::TunnelResponse(_) => PacketType::TunnelResponse,
            Self::TunnelAuth(_) => PacketType::TunnelAuth,
            Self::TunnelAuthResponse(_) => PacketType::TunnelAuthResponse,
            Self::ChannelCreate(_) => PacketType::ChannelCreate,
            Self::ChannelResponse(_) => PacketType::ChannelResponse,
            Self::Data(_) => PacketType::Data,
            Self::ServiceMessage(_) => PacketType::ServiceMessage,
            Self::ReauthMessage(_) => PacketType::ReauthMessage,
            Self::Keepalive => PacketType::Keepalive,
            Self::CloseChannel(_) => PacketType::CloseChannel,
            Self::CloseChannelResponse(_) => PacketType::CloseChannelResponse,
        }
    }

    /// Encodes the full packet (header + body) into `bytes`, overwriting
    /// any previous contents.
    pub fn encode(&self, bytes: &mut BytesMut) -> Result<(), Error> {
        bytes.clear();
        bytes.put_bytes(0, HEADER_LEN);

        self.encode_body(bytes)?;

        if bytes.len() > MAX_BODY_LEN + HEADER_LEN {
            return Err(Error::BodyTooLarge);
        }

        let header = PacketHeader {
            packet_type: self.packet_type(),
            length: bytes.len() as u32,
        };

        let mut head = BytesMut::with_capacity(HEADER_LEN);
        header.encode(&mut head);
        bytes[..HEADER_LEN].copy_from_slice(&head);

        Ok(())
    }

    fn encode_body(&self, bytes: &mut BytesMut) -> Result<(), Error> {
        match self {
            Self::HandshakeRequest(body) => {
                bytes.put_u8(body.version);
                bytes.put_u16_le(body.extended_auth_requested.0);
            }
            Self::HandshakeResponse(body) => {
                bytes.put_u32_le(body.error_code);
                bytes.put_u16_le(body.extended_auth_supported.0);
            }
            Self::ExtendedAuthMessage(body) => write_blob(bytes, &body.blob),
            Self::TunnelCreate(body) => {
                bytes.put_u32_le(body.presence);
                if body.presence & presence::tunnel_create::PAA_COOKIE != 0 {
                    write_blob(bytes, body.paa_cookie.as_deref().unwrap_or_default());
                }
            }
            Self::TunnelResponse(body) => {
                bytes.put_u32_le(body.presence);
                bytes.put_u32_le(body.error_code);

                if body.presence & presence::tunnel_response::TUNNEL_ID != 0 {
                    bytes.put_u32_le(body.tunnel_id.unwrap_or(0));
                }
                if body.presence & presence::tunnel_response::CAPS != 0 {
                    bytes.put_u32_le(body.caps.map(|c| c.0).unwrap_or(0));
                }
                if body.presence & presence::tunnel_response::SOH_REQ != 0 {
                    write_blob(bytes, body.soh_request.as_deref().unwrap_or_default());
                }
                if body.presence & presence::tunnel_response::CONSENT_MSG != 0 {
                    write_string(bytes, body.consent_message.as_deref().unwrap_or(""));
                }
            }
            Self::TunnelAuth(body) => write_string(bytes, &body.client_machine_name),
            Self::TunnelAuthResponse(body) => {
                bytes.put_u32_le(body.presence);
                bytes.put_u32_le(body.error_code);

                if body.presence & presence::tunnel_auth_response::REDIR_FLAGS != 0 {
                    bytes.put_u32_le(body.redirect_flags.map(|f| f.0).unwrap_or(0));
                }
                if body.presence & presence::tunnel_auth_response::IDLE_TIMEOUT != 0 {
                    bytes.put_u32_le(body.idle_timeout.unwrap_or(0));
                }
                if body.presence & presence::tunnel_auth_response::SOH_RESPONSE != 0 {
                    write_blob(bytes, body.soh_response.as_deref().unwrap_or_default());
                }
            }
            Self::ChannelCreate(body) => {
                write_string_list(bytes, &body.resource_names);
                bytes.put_u16_le(body.protocol);
                bytes.put_u16_le(body.port);
            }
            Self::ChannelResponse(body) => {
                bytes.put_u32_le(body.presence);
                bytes.put_u32_le(body.error_code);

                if body.presence & presence::channel_response::CHANNELID != 0 {
                    bytes.put_u32_le(body.channel_id.unwrap_or(0));
                }
                if body.presence & presence::channel_response::AUTHNCOOKIE != 0 {
                    write_blob(bytes, body.auth_cookie.as_deref().unwrap_or_default());
                }
                if body.presence & presence::channel_response::UDPPORT != 0 {
                    bytes.put_u16_le(body.udp_port.unwrap_or(0));
                }
            }
            Self::Data(body) => bytes.extend_from_slice(&body.payload),
            Self::ServiceMessage(body) => write_string(bytes, &body.text),
            Self::ReauthMessage(body) => write_blob(bytes, &body.paa_cookie),
            Self::Keepalive => {}
            Self::CloseChannel(body) => bytes.put_u32_le(body.reason),
            Self::CloseChannelResponse(body) => bytes.put_u32_le(body.error_code),
        }

        Ok(())
    }

    /// Decodes a packet given its already-parsed header and the body bytes
    /// that followed it (i.e. `full_packet[HEADER_LEN..]`).
    pub fn decode(header: &PacketHeader, body: &[u8]) -> Result<Self, Error> {
        if body.len() > MAX_BODY_LEN {
            return Err(Error::BodyTooLarge);
        }

        if header.length as usize != HEADER_LEN + body.len() {
            return Err(Error::Malformed("declared length does not match body"));
        }

        let mut buf = body;

        Ok(match header.packet_type {
            PacketType::HandshakeRequest => {
                if buf.len() < 3 {
                    return Err(Error::Malformed("handshake request too short"));
                }
                Self::HandshakeRequest(HandshakeRequest {
                    version: buf.get_u8(),
                    extended_auth_requested: buf.get_u16_le().into(),
                })
            }
            PacketType::HandshakeResponse => {
                if buf.len() < 6 {
                    return Err(Error::Malformed("handshake response too short"));
                }
                Self::HandshakeResponse(HandshakeResponse {
                    error_code: buf.get_u32_le(),
                    extended_auth_supported: buf.get_u16_le().into(),
                })
            }
            PacketType::ExtendedAuthMessage => Self::ExtendedAuthMessage(ExtendedAuthMessage {
                blob: read_blob(&mut buf)?,
            }),
            PacketType::TunnelCreate => {
                if buf.len() < 4 {
                    return Err(Error::Malformed("tunnel create too short"));
                }
                let presence = buf.get_u32_le();
                let paa_cookie = if presence & presence::tunnel_create::PAA_COOKIE != 0 {
                    Some(read_blob(&mut buf)?)
                } else {
                    None
                };
                Self::TunnelCreate(TunnelCreate {
                    presence,
                    paa_cookie,
                })
            }
            PacketType::TunnelResponse => {
                if buf.len() < 8 {
                    return Err(Error::Malformed("tunnel response too short"));
                }
                let presence = buf.get_u32_le();
                let error_code = buf.get_u32_le();

                let tunnel_id = if presence & presence::tunnel_response::TUNNEL_ID != 0 {
                    if buf.len() < 4 {
                        return Err(Error::Malformed("missing tunnel id"));
                    }
                    Some(buf.get_u32_le())
                } else {
                    None
                };
                let caps = if presence & presence::tunnel_response::CAPS != 0 {
                    if buf.len() < 4 {
                        return Err(Error::Malformed("missing caps"));
                    }
                    Some(Capabilities(buf.get_u32_le()))
                } else {
                    None
                };
                let soh_request = if presence & presence::tunnel_response::SOH_REQ != 0 {
                    Some(read_blob(&mut buf)?)
                } else {
                    None
                };
                let consent_message = if presence & presence::tunnel_response::CONSENT_MSG != 0 {
                    Some(read_string(&mut buf)?)
                } else {
                    None
                };

                Self::TunnelResponse(TunnelResponse {
                    presence,
                    error_code,
                    tunnel_id,
                    caps,
                    soh_request,
                    consent_message,
                })
            }
            PacketType::TunnelAuth => Self::TunnelAuth(TunnelAuth {
                client_machine_name: read_string(&mut buf)?,
            }),
            PacketType::TunnelAuthResponse => {
                if buf.len() < 8 {
                    return Err(Error::Malformed("tunnel auth response too short"));
                }
                let presence = buf.get_u32_le();
                let error_code = buf.get_u32_le();

                let redirect_flags = if presence & presence::tunnel_auth_response::REDIR_FLAGS != 0
                {
                    if buf.len() < 4 {
                        return Err(Error::Malformed("missing redirect flags"));
                    }
                    Some(RedirectFlags(buf.get_u32_le()))
                } else {
                    None
                };
                let idle_timeout = if presence & presence::tunnel_auth_response::IDLE_TIMEOUT != 0 {
                    if buf.len() < 4 {
                        return Err(Error::Malformed("missing idle timeout"));
                    }
                    Some(buf.get_u32_le())
                } else {
                    None
                };
                let soh_response = if presence & presence::tunnel_auth_response::SOH_RESPONSE != 0 {
                    Some(read_blob(&mut buf)?)
                } else {
                    None
                };

                Self::TunnelAuthResponse(TunnelAuthResponse {
                    presence,
                    error_code,
                    redirect_flags,
                    idle_timeout,
                    soh_response,
                })
            }
            PacketType::ChannelCreate => {
                let resource_names = read_string_list(&mut buf)?;
                if buf.len() < 4 {
                    return Err(Error::Malformed("channel create missing protocol/port"));
                }
                Self::ChannelCreate(ChannelCreate {
                    resource_names,
                    protocol: buf.get_u16_le(),
                    port: buf.get_u16_le(),
                })
            }
            PacketType::ChannelResponse => {
                if buf.len() < 8 {
                    return Err(Error::Malformed("channel response too short"));
                }
                let presence = buf.get_u32_le();
                let error_code = buf.get_u32_le();

                let channel_id = if presence & presence::channel_response::CHANNELID != 0 {
                    if buf.len() < 4 {
                        return Err(Error::Malformed("missing channel id"));
                    }
                    Some(buf.get_u32_le())
                } else {
                    None
                };
                let auth_cookie = if presence & presence::channel_response::AUTHNCOOKIE != 0 {
                    Some(read_blob(&mut buf)?)
                } else {
                    None
                };
                let udp_port = if presence & presence::channel_response::UDPPORT != 0 {
                    if buf.len() < 2 {
                        return Err(Error::Malformed("missing udp port"));
                    }
                    Some(buf.get_u16_le())
                } else {
                    None
                };

                Self::ChannelResponse(ChannelResponse {
                    presence,
                    error_code,
                    channel_id,
                    auth_cookie,
                    udp_port,
                })
            }
            PacketType::Data => Self::Data(Data {
                payload: buf.to_vec(),
            }),
            PacketType::ServiceMessage => Self::ServiceMessage(ServiceMessage {
                text: read_string(&mut buf)?,
            }),
            PacketType::ReauthMessage => Self::ReauthMessage(ReauthMessage {
                paa_cookie: read_blob(&mut buf)?,
            }),
            PacketType::Keepalive => Self::Keepalive,
            PacketType::CloseChannel => {
                if buf.len() < 4 {
                    return Err(Error::Malformed("close channel too short"));
                }
                Self::CloseChannel(CloseChannel {
                    reason: buf.get_u32_le(),
                })
            }
            PacketType::CloseChannelResponse => {
                if buf.len() < 4 {
                    return Err(Error::Malformed("close channel response too short"));
                }
                Self::CloseChannelResponse(CloseChannelResponse {
                    error_code: buf.get_u32_le(),
                })
            }
        })
    }
}
