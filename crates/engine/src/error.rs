//! Error kinds surfaced by the engine. `spec.md` §7.
//!
//! Every kind terminates the session; none are retried inside the engine.
//! The façade is responsible for logging each occurrence with session id,
//! state, and reason (`spec.md` §7 propagation policy).

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Malformed,
    UnsupportedPacket,
    ProtocolViolation,
    AuthRejected,
    AuthMismatch,
    HostDenied,
    BackendUnavailable,
    Idle,
    Transport,
    ReauthFailed,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Malformed => "MALFORMED",
            Self::UnsupportedPacket => "UNSUPPORTED_PACKET",
            Self::ProtocolViolation => "PROTOCOL_VIOLATION",
            Self::AuthRejected => "AUTH_REJECTED",
            Self::AuthMismatch => "AUTH_MISMATCH",
            Self::HostDenied => "HOST_DENIED",
            Self::BackendUnavailable => "BACKEND_UNAVAILABLE",
            Self::Idle => "IDLE",
            Self::Transport => "TRANSPORT",
            Self::ReauthFailed => "REAUTH_FAILED",
            Self::Internal => "INTERNAL",
        }
    }
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub reason: String,
}

impl Error {
    pub fn new(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.reason)
    }
}

impl std::error::Error for Error {}

impl From<codec::Error> for Error {
    fn from(err: codec::Error) -> Self {
        let kind = match &err {
            codec::Error::UnsupportedPacket(_) => ErrorKind::UnsupportedPacket,
            _ => ErrorKind::Malformed,
        };

        Self::new(kind, err.to_string())
    }
}
