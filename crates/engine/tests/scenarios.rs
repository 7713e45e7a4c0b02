//! End-to-end tunnel/channel state machine scenarios. `spec.md` §8.2.
//!
//! Drives a [`TunnelEngine`] against an in-memory [`MockTransport`] so each
//! scenario controls exactly which packets the client "sends" and observes
//! exactly what the engine writes back, without a real HTTP or WebSocket
//! layer in the way.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use codec::caps::presence;
use codec::packet::{
    ChannelCreate, ChannelResponse, CloseChannel, HandshakeRequest, TunnelAuth, TunnelCreate,
    E_ACCESSDENIED,
};
use codec::Packet;
use engine::authorizer::{Authorizer, ClientIpGuard, HostDecision, HostSelector, PaaVerifier, RejectReason};
use engine::transport::{Transport, TransportError};
use engine::{Claims, EngineConfig, ErrorKind, Session, SessionId, TunnelEngine};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

struct MockTransport {
    inbound: mpsc::UnboundedReceiver<Packet>,
    outbound: mpsc::UnboundedSender<Packet>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn read_packet(&mut self) -> Result<Option<Packet>, TransportError> {
        Ok(self.inbound.recv().await)
    }

    async fn write_packet(&mut self, packet: &Packet) -> Result<(), TransportError> {
        self.outbound
            .send(packet.clone())
            .map_err(|_| TransportError::Closed("test harness dropped the outbound end".into()))
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}

/// Returns a `Transport` for the engine plus the two ends a test drives it
/// with: `client_tx` feeds inbound packets, `server_rx` collects whatever
/// the engine writes.
fn harness() -> (
    MockTransport,
    mpsc::UnboundedSender<Packet>,
    mpsc::UnboundedReceiver<Packet>,
) {
    let (client_tx, client_rx) = mpsc::unbounded_channel();
    let (server_tx, server_rx) = mpsc::unbounded_channel();
    (
        MockTransport {
            inbound: client_rx,
            outbound: server_tx,
        },
        client_tx,
        server_rx,
    )
}

struct AllowVerifier(Claims);

#[async_trait]
impl PaaVerifier for AllowVerifier {
    async fn verify(&self, _raw: &[u8]) -> Result<Claims, RejectReason> {
        Ok(self.0.clone())
    }
}

struct RejectVerifier(RejectReason);

#[async_trait]
impl PaaVerifier for RejectVerifier {
    async fn verify(&self, _raw: &[u8]) -> Result<Claims, RejectReason> {
        Err(self.0)
    }
}

struct FixedHostSelector(HostDecision);

#[async_trait]
impl HostSelector for FixedHostSelector {
    async fn select(&self, _requested: &[String], _claims: Option<&Claims>) -> HostDecision {
        self.0.clone()
    }
}

struct DefaultIpGuard;
impl ClientIpGuard for DefaultIpGuard {}

fn claims(remote_host: &str, client_ip: &str) -> Claims {
    Claims {
        remote_host: remote_host.to_string(),
        client_ip: client_ip.parse().unwrap(),
        user: "alice".to_string(),
        exp: u64::MAX,
    }
}

fn client_addr() -> SocketAddr {
    "192.0.2.5:54321".parse().unwrap()
}

fn session() -> Session {
    Session::new(SessionId(1), client_addr())
}

fn handshake_request() -> Packet {
    Packet::HandshakeRequest(HandshakeRequest {
        version: codec::header::PROTOCOL_VERSION,
        extended_auth_requested: Default::default(),
    })
}

fn tunnel_create(paa_cookie: Option<Vec<u8>>) -> Packet {
    Packet::TunnelCreate(TunnelCreate {
        presence: if paa_cookie.is_some() {
            presence::tunnel_create::PAA_COOKIE
        } else {
            0
        },
        paa_cookie,
    })
}

fn tunnel_auth() -> Packet {
    Packet::TunnelAuth(TunnelAuth {
        client_machine_name: "workstation-1".to_string(),
    })
}

fn channel_create(resource: &str) -> Packet {
    Packet::ChannelCreate(ChannelCreate {
        resource_names: vec![resource.to_string()],
        protocol: 3,
        port: 3389,
    })
}

async fn recv(server_rx: &mut mpsc::UnboundedReceiver<Packet>) -> Packet {
    tokio::time::timeout(Duration::from_secs(1), server_rx.recv())
        .await
        .expect("engine response timed out")
        .expect("engine closed its outbound channel unexpectedly")
}

#[tokio::test]
async fn happy_path_token_auth_relays_data_both_ways_then_closes_cleanly() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();

    let (transport, client_tx, mut server_rx) = harness();
    let authorizer = Authorizer {
        token_auth: true,
        verify_client_ip: true,
        paa_verifier: Box::new(AllowVerifier(claims(
            &backend_addr.to_string(),
            &client_addr().ip().to_string(),
        ))),
        host_selector: Box::new(FixedHostSelector(HostDecision::Allow(backend_addr.to_string()))),
        client_ip_guard: Box::new(DefaultIpGuard),
    };

    let mut engine = TunnelEngine::new(
        session(),
        Box::new(transport),
        std::sync::Arc::new(authorizer),
        EngineConfig::default(),
    );
    let run = tokio::spawn(async move { engine.run().await });

    client_tx.send(handshake_request()).unwrap();
    assert!(matches!(recv(&mut server_rx).await, Packet::HandshakeResponse(_)));

    client_tx
        .send(tunnel_create(Some(b"paa-cookie".to_vec())))
        .unwrap();
    assert!(matches!(recv(&mut server_rx).await, Packet::TunnelResponse(_)));

    client_tx.send(tunnel_auth()).unwrap();
    assert!(matches!(
        recv(&mut server_rx).await,
        Packet::TunnelAuthResponse(_)
    ));

    // The engine dials the backend while processing this packet, so the
    // accept below only resolves once it has.
    client_tx.send(channel_create(&backend_addr.to_string())).unwrap();
    let (mut backend_stream, _) = backend.accept().await.unwrap();
    assert!(matches!(recv(&mut server_rx).await, Packet::ChannelResponse(_)));

    client_tx
        .send(Packet::Data(codec::packet::Data {
            payload: b"hello backend".to_vec(),
        }))
        .unwrap();

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    let mut buf = [0u8; 64];
    let n = backend_stream.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"hello backend");

    backend_stream.write_all(b"hello client").await.unwrap();
    match recv(&mut server_rx).await {
        Packet::Data(body) => assert_eq!(body.payload, b"hello client"),
        other => panic!("expected Data, got {other:?}"),
    }

    client_tx
        .send(Packet::CloseChannel(CloseChannel { reason: 0 }))
        .unwrap();
    assert!(matches!(
        recv(&mut server_rx).await,
        Packet::CloseChannelResponse(_)
    ));

    let result = run.await.unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn expired_token_is_rejected_before_any_backend_dial() {
    let (transport, client_tx, mut server_rx) = harness();
    let authorizer = Authorizer {
        token_auth: true,
        verify_client_ip: false,
        paa_verifier: Box::new(RejectVerifier(RejectReason::Expired)),
        host_selector: Box::new(FixedHostSelector(HostDecision::Denied)),
        client_ip_guard: Box::new(DefaultIpGuard),
    };

    let mut engine = TunnelEngine::new(
        session(),
        Box::new(transport),
        std::sync::Arc::new(authorizer),
        EngineConfig::default(),
    );
    let run = tokio::spawn(async move { engine.run().await });

    client_tx.send(handshake_request()).unwrap();
    assert!(matches!(recv(&mut server_rx).await, Packet::HandshakeResponse(_)));

    client_tx
        .send(tunnel_create(Some(b"expired-cookie".to_vec())))
        .unwrap();
    match recv(&mut server_rx).await {
        Packet::TunnelResponse(body) => assert_ne!(body.error_code, 0),
        other => panic!("expected TunnelResponse, got {other:?}"),
    }

    let err = run.await.unwrap().unwrap_err();
    assert_eq!(err.kind, ErrorKind::AuthRejected);
}

#[tokio::test]
async fn client_ip_mismatch_is_rejected_at_tunnel_create() {
    let (transport, client_tx, mut server_rx) = harness();
    let authorizer = Authorizer {
        token_auth: true,
        verify_client_ip: true,
        paa_verifier: Box::new(AllowVerifier(claims("host-a:3389", "203.0.113.9"))),
        host_selector: Box::new(FixedHostSelector(HostDecision::Allow("host-a:3389".into()))),
        client_ip_guard: Box::new(DefaultIpGuard),
    };

    let mut engine = TunnelEngine::new(
        session(),
        Box::new(transport),
        std::sync::Arc::new(authorizer),
        EngineConfig::default(),
    );
    let run = tokio::spawn(async move { engine.run().await });

    client_tx.send(handshake_request()).unwrap();
    recv(&mut server_rx).await;

    client_tx
        .send(tunnel_create(Some(b"cookie".to_vec())))
        .unwrap();
    recv(&mut server_rx).await;

    let err = run.await.unwrap().unwrap_err();
    assert_eq!(err.kind, ErrorKind::AuthMismatch);
}

#[tokio::test]
async fn host_denied_returns_access_denied_and_closes() {
    let (transport, client_tx, mut server_rx) = harness();
    let authorizer = Authorizer {
        token_auth: true,
        verify_client_ip: false,
        paa_verifier: Box::new(AllowVerifier(claims("host-a:3389", "0.0.0.0"))),
        host_selector: Box::new(FixedHostSelector(HostDecision::Denied)),
        client_ip_guard: Box::new(DefaultIpGuard),
    };

    let mut engine = TunnelEngine::new(
        session(),
        Box::new(transport),
        std::sync::Arc::new(authorizer),
        EngineConfig::default(),
    );
    let run = tokio::spawn(async move { engine.run().await });

    client_tx.send(handshake_request()).unwrap();
    recv(&mut server_rx).await;
    client_tx.send(tunnel_create(Some(b"cookie".to_vec()))).unwrap();
    recv(&mut server_rx).await;
    client_tx.send(tunnel_auth()).unwrap();
    recv(&mut server_rx).await;

    client_tx.send(channel_create("evil-resource:3389")).unwrap();
    match recv(&mut server_rx).await {
        Packet::ChannelResponse(ChannelResponse { error_code, .. }) => {
            assert_eq!(error_code, E_ACCESSDENIED)
        }
        other => panic!("expected ChannelResponse, got {other:?}"),
    }

    let err = run.await.unwrap().unwrap_err();
    assert_eq!(err.kind, ErrorKind::HostDenied);
}

#[tokio::test]
async fn backend_dial_failure_surfaces_as_backend_unavailable() {
    // Bind then drop immediately: the port is free again but nothing is
    // listening, so the connect attempt fails fast.
    let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = probe.local_addr().unwrap();
    drop(probe);

    let (transport, client_tx, mut server_rx) = harness();
    let authorizer = Authorizer {
        token_auth: false,
        verify_client_ip: false,
        paa_verifier: Box::new(AllowVerifier(claims("unused", "0.0.0.0"))),
        host_selector: Box::new(FixedHostSelector(HostDecision::Allow(dead_addr.to_string()))),
        client_ip_guard: Box::new(DefaultIpGuard),
    };

    let mut engine = TunnelEngine::new(
        session(),
        Box::new(transport),
        std::sync::Arc::new(authorizer),
        EngineConfig::default(),
    );
    let run = tokio::spawn(async move { engine.run().await });

    client_tx.send(handshake_request()).unwrap();
    recv(&mut server_rx).await;
    client_tx.send(tunnel_create(None)).unwrap();
    recv(&mut server_rx).await;
    client_tx.send(tunnel_auth()).unwrap();
    recv(&mut server_rx).await;

    client_tx.send(channel_create(&dead_addr.to_string())).unwrap();
    match recv(&mut server_rx).await {
        Packet::ChannelResponse(ChannelResponse { error_code, .. }) => assert_ne!(error_code, 0),
        other => panic!("expected ChannelResponse, got {other:?}"),
    }

    let err = run.await.unwrap().unwrap_err();
    assert_eq!(err.kind, ErrorKind::BackendUnavailable);
}

#[tokio::test]
async fn idle_timeout_closes_the_session_without_client_traffic() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();

    let (transport, client_tx, mut server_rx) = harness();
    let authorizer = Authorizer {
        token_auth: false,
        verify_client_ip: false,
        paa_verifier: Box::new(AllowVerifier(claims("unused", "0.0.0.0"))),
        host_selector: Box::new(FixedHostSelector(HostDecision::Allow(backend_addr.to_string()))),
        client_ip_guard: Box::new(DefaultIpGuard),
    };
    let config = EngineConfig {
        idle_timeout: 1,
        ..EngineConfig::default()
    };

    let mut engine = TunnelEngine::new(
        session(),
        Box::new(transport),
        std::sync::Arc::new(authorizer),
        config,
    );
    let run = tokio::spawn(async move { engine.run().await });

    client_tx.send(handshake_request()).unwrap();
    recv(&mut server_rx).await;
    client_tx.send(tunnel_create(None)).unwrap();
    recv(&mut server_rx).await;
    client_tx.send(tunnel_auth()).unwrap();
    recv(&mut server_rx).await;
    client_tx.send(channel_create(&backend_addr.to_string())).unwrap();
    let (_backend_stream, _) = backend.accept().await.unwrap();
    recv(&mut server_rx).await;

    // Send nothing further; the engine should time out on its own and emit
    // a server-initiated CLOSE_CHANNEL before the transport is torn down.
    let close = recv(&mut server_rx).await;
    assert!(matches!(close, Packet::CloseChannel(_)));

    let err = tokio::time::timeout(Duration::from_secs(3), run)
        .await
        .expect("engine did not close within the idle grace period")
        .unwrap()
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Idle);
}

#[tokio::test]
async fn unexpected_packet_in_initialized_state_is_a_protocol_violation() {
    let (transport, client_tx, _server_rx) = harness();
    let authorizer = Authorizer {
        token_auth: false,
        verify_client_ip: false,
        paa_verifier: Box::new(AllowVerifier(claims("unused", "0.0.0.0"))),
        host_selector: Box::new(FixedHostSelector(HostDecision::Denied)),
        client_ip_guard: Box::new(DefaultIpGuard),
    };

    let mut engine = TunnelEngine::new(
        session(),
        Box::new(transport),
        std::sync::Arc::new(authorizer),
        EngineConfig::default(),
    );
    let run = tokio::spawn(async move { engine.run().await });

    // A ChannelCreate before any handshake is out of order for every state.
    client_tx.send(channel_create("host-a:3389")).unwrap();

    let err = run.await.unwrap().unwrap_err();
    assert_eq!(err.kind, ErrorKind::ProtocolViolation);
}
