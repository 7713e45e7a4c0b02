//! Authorizer contracts. `spec.md` §4.4.
//!
//! These are the three callbacks the state machine invokes; this crate only
//! defines the trait boundary; concrete implementations (PAA token
//! decoding, host-selection policy, IP comparison) live in the binary crate
//! per `SPEC_FULL.md` §4.4, mirroring how the teacher keeps `Observer`
//! implementations out of `crates/service`.

use std::net::IpAddr;

use async_trait::async_trait;

use crate::session::Claims;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Expired,
    BadSignature,
    BadEncryption,
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostDecision {
    Allow(String),
    Denied,
}

#[async_trait]
pub trait PaaVerifier: Send + Sync {
    async fn verify(&self, raw: &[u8]) -> Result<Claims, RejectReason>;
}

#[async_trait]
pub trait HostSelector: Send + Sync {
    async fn select(&self, requested: &[String], claims: Option<&Claims>) -> HostDecision;
}

pub trait ClientIpGuard: Send + Sync {
    fn check(&self, session_ip: IpAddr, claims_ip: IpAddr) -> bool {
        session_ip == claims_ip
    }
}

/// Bundles the three authorizer callbacks plus the static policy knobs that
/// gate whether they're consulted at all (`spec.md` §4.3 tie-breaks).
pub struct Authorizer {
    pub token_auth: bool,
    pub verify_client_ip: bool,
    pub paa_verifier: Box<dyn PaaVerifier>,
    pub host_selector: Box<dyn HostSelector>,
    pub client_ip_guard: Box<dyn ClientIpGuard>,
}
