//! Concrete authorizer implementations.
//!
//! `engine::authorizer` only defines the trait boundary; these are the
//! swappable policy implementations the façade wires in. The real PAA
//! token issuer/verifier is an external collaborator (`spec.md` §1); the
//! verifier below is a deliberately simple HMAC-over-JSON stand-in so the
//! gateway has something concrete to exercise end to end.

use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use engine::authorizer::{ClientIpGuard, HostDecision, HostSelector, PaaVerifier, RejectReason};
use engine::Claims;
use hmac::{Hmac, Mac};
use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

use crate::config::HostSelection;

/// Verifies the bincode-free, base64+HMAC envelope produced by `GET
/// /connect`'s stand-in issuer (see `src/api/mod.rs`). Not a general PAA
/// implementation: the real signer/encrypter is out of core scope.
pub struct StaticPaaVerifier {
    hmac_key: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct EnvelopeClaims {
    remote_host: String,
    client_ip: IpAddr,
    user: String,
    exp: u64,
}

/// Produces the envelope `StaticPaaVerifier::verify` accepts: base64(JSON
/// claims) + `.` + base64(HMAC-SHA256 of the claims). Used by the `/connect`
/// stand-in issuer to hand the client a PAA cookie it can present in
/// `TUNNEL_CREATE`.
pub fn sign_envelope(hmac_key: &[u8], claims: &Claims) -> String {
    let payload = serde_json::to_vec(&EnvelopeClaims {
        remote_host: claims.remote_host.clone(),
        client_ip: claims.client_ip,
        user: claims.user.clone(),
        exp: claims.exp,
    })
    .expect("Claims serializes to JSON");

    let mut signer =
        HmacSha256::new_from_slice(hmac_key).expect("HMAC accepts keys of any length");
    signer.update(&payload);
    let mac = signer.finalize().into_bytes();

    format!("{}.{}", BASE64.encode(&payload), BASE64.encode(mac))
}

impl StaticPaaVerifier {
    pub fn new(hmac_key: impl Into<String>) -> Self {
        Self {
            hmac_key: hmac_key.into().into_bytes(),
        }
    }

    fn current_unix_time() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

#[async_trait]
impl PaaVerifier for StaticPaaVerifier {
    async fn verify(&self, raw: &[u8]) -> Result<Claims, RejectReason> {
        let text = std::str::from_utf8(raw).map_err(|_| RejectReason::Malformed)?;
        let (payload_b64, mac_b64) = text.split_once('.').ok_or(RejectReason::Malformed)?;

        let payload = BASE64
            .decode(payload_b64)
            .map_err(|_| RejectReason::Malformed)?;
        let mac = BASE64
            .decode(mac_b64)
            .map_err(|_| RejectReason::Malformed)?;

        let mut verifier =
            HmacSha256::new_from_slice(&self.hmac_key).expect("HMAC accepts keys of any length");
        verifier.update(&payload);
        if verifier.verify_slice(&mac).is_err() {
            return Err(RejectReason::BadSignature);
        }

        let claims: EnvelopeClaims =
            serde_json::from_slice(&payload).map_err(|_| RejectReason::Malformed)?;

        if claims.exp <= Self::current_unix_time() {
            return Err(RejectReason::Expired);
        }

        Ok(Claims {
            remote_host: claims.remote_host,
            client_ip: claims.client_ip,
            user: claims.user,
            exp: claims.exp,
        })
    }
}

/// Implements the three `host_selection` modes fixed in `SPEC_FULL.md` §9:
/// `any` takes the client's first requested resource verbatim, `signed`
/// restricts to `claims.remote_host`, `round_robin` ignores the request
/// entirely and cycles `hosts`.
pub struct ConfiguredHostSelector {
    mode: HostSelection,
    hosts: Vec<String>,
    cursor: SyncMutex<AtomicUsizeCell>,
}

struct AtomicUsizeCell(AtomicUsize);

impl ConfiguredHostSelector {
    pub fn new(mode: HostSelection, hosts: Vec<String>) -> Self {
        Self {
            mode,
            hosts,
            cursor: SyncMutex::new(AtomicUsizeCell(AtomicUsize::new(0))),
        }
    }

    fn next_round_robin(&self) -> Option<String> {
        if self.hosts.is_empty() {
            return None;
        }

        let guard = self.cursor.lock();
        let index = guard.0.fetch_add(1, Ordering::Relaxed) % self.hosts.len();
        Some(self.hosts[index].clone())
    }
}

#[async_trait]
impl HostSelector for ConfiguredHostSelector {
    async fn select(&self, requested: &[String], claims: Option<&Claims>) -> HostDecision {
        match self.mode {
            HostSelection::Any => match requested.first() {
                Some(host) => HostDecision::Allow(host.clone()),
                None => HostDecision::Denied,
            },
            HostSelection::Signed => match claims {
                Some(claims) => HostDecision::Allow(claims.remote_host.clone()),
                None => HostDecision::Denied,
            },
            HostSelection::RoundRobin => match self.next_round_robin() {
                Some(host) => HostDecision::Allow(host),
                None => HostDecision::Denied,
            },
        }
    }
}

pub struct StrictClientIpGuard;

impl ClientIpGuard for StrictClientIpGuard {
    fn check(&self, session_ip: IpAddr, claims_ip: IpAddr) -> bool {
        session_ip == claims_ip
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(remote_host: &str) -> Claims {
        Claims {
            remote_host: remote_host.to_string(),
            client_ip: "127.0.0.1".parse().unwrap(),
            user: "alice".to_string(),
            exp: u64::MAX,
        }
    }

    #[tokio::test]
    async fn any_mode_takes_first_requested_resource() {
        let selector = ConfiguredHostSelector::new(HostSelection::Any, vec![]);
        let decision = selector
            .select(&["host-a:3389".to_string(), "host-b:3389".to_string()], None)
            .await;
        assert_eq!(decision, HostDecision::Allow("host-a:3389".to_string()));
    }

    #[tokio::test]
    async fn signed_mode_ignores_request_and_uses_claims() {
        let selector = ConfiguredHostSelector::new(HostSelection::Signed, vec![]);
        let decision = selector
            .select(&["evil:3389".to_string()], Some(&claims("host-a:3389")))
            .await;
        assert_eq!(decision, HostDecision::Allow("host-a:3389".to_string()));
    }

    #[tokio::test]
    async fn signed_mode_denies_without_claims() {
        let selector = ConfiguredHostSelector::new(HostSelection::Signed, vec![]);
        let decision = selector.select(&["host-a:3389".to_string()], None).await;
        assert_eq!(decision, HostDecision::Denied);
    }

    #[tokio::test]
    async fn round_robin_cycles_configured_hosts() {
        let hosts = vec!["a:1".to_string(), "b:1".to_string(), "c:1".to_string()];
        let selector = ConfiguredHostSelector::new(HostSelection::RoundRobin, hosts);

        let first = selector.select(&["ignored:1".to_string()], None).await;
        let second = selector.select(&[], None).await;
        let third = selector.select(&[], None).await;
        let fourth = selector.select(&[], None).await;

        assert_eq!(first, HostDecision::Allow("a:1".to_string()));
        assert_eq!(second, HostDecision::Allow("b:1".to_string()));
        assert_eq!(third, HostDecision::Allow("c:1".to_string()));
        assert_eq!(fourth, HostDecision::Allow("a:1".to_string()));
    }

    #[tokio::test]
    async fn verifier_accepts_a_correctly_signed_envelope() {
        let key = b"test-key".to_vec();
        let claims = Claims {
            remote_host: "host-a:3389".to_string(),
            client_ip: "192.0.2.5".parse().unwrap(),
            user: "alice".to_string(),
            exp: u64::MAX,
        };
        let envelope = sign_envelope(&key, &claims);

        let verifier = StaticPaaVerifier::new(String::from_utf8(key).unwrap());
        let verified = verifier.verify(envelope.as_bytes()).await.unwrap();
        assert_eq!(verified, claims);
    }

    #[tokio::test]
    async fn verifier_rejects_a_tampered_envelope() {
        let claims = claims("host-a:3389");
        let envelope = sign_envelope(b"real-key", &claims);

        let verifier = StaticPaaVerifier::new("wrong-key");
        let result = verifier.verify(envelope.as_bytes()).await;
        assert_eq!(result.unwrap_err(), RejectReason::BadSignature);
    }

    #[tokio::test]
    async fn verifier_rejects_an_expired_envelope() {
        let key = b"test-key".to_vec();
        let claims = Claims {
            remote_host: "host-a:3389".to_string(),
            client_ip: "127.0.0.1".parse().unwrap(),
            user: "alice".to_string(),
            exp: 0,
        };
        let envelope = sign_envelope(&key, &claims);

        let verifier = StaticPaaVerifier::new(String::from_utf8(key).unwrap());
        let result = verifier.verify(envelope.as_bytes()).await;
        assert_eq!(result.unwrap_err(), RejectReason::Expired);
    }

    #[test]
    fn strict_ip_guard_requires_exact_match() {
        let guard = StrictClientIpGuard;
        assert!(guard.check("10.0.0.1".parse().unwrap(), "10.0.0.1".parse().unwrap()));
        assert!(!guard.check("10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap()));
    }
}
