//! The tunnel state machine. `spec.md` §4.3.
//!
//! `TunnelEngine::run` is one async loop matching on `(state, packet)`; the
//! table in `spec.md` §4.3 is authoritative and every arm below cites the
//! table row it implements. Any packet not listed for the current state is
//! `PROTOCOL_VIOLATION`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use codec::caps::{presence, Capabilities, ExtendedAuthFlags, RedirectFlags};
use codec::packet::{
    ChannelResponse, CloseChannel, CloseChannelResponse, HandshakeResponse, TunnelAuthResponse,
    TunnelResponse, E_ACCESSDENIED, E_FAIL, ERROR_SUCCESS,
};
use codec::Packet;
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::timeout;

use crate::authorizer::{Authorizer, HostDecision};
use crate::error::{Error, ErrorKind};
use crate::pump::Pump;
use crate::session::{Session, State};
use crate::transport::Transport;

/// The static policy knobs the engine consults. Everything here is
/// read-only for the lifetime of a session (`spec.md` §5 shared resource
/// policy).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub smart_card_auth: bool,
    pub enable_reauth: bool,
    pub redirect_flags: RedirectFlags,
    pub idle_timeout: u32,
    pub send_buf: usize,
    pub receive_buf: usize,
    pub handshake_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            smart_card_auth: false,
            enable_reauth: true,
            redirect_flags: RedirectFlags::default(),
            idle_timeout: 0,
            send_buf: 64 * 1024,
            receive_buf: 64 * 1024,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

pub struct TunnelEngine {
    session: Session,
    transport: Arc<AsyncMutex<Box<dyn Transport>>>,
    authorizer: Arc<Authorizer>,
    config: EngineConfig,
    state_observer: Option<Box<dyn Fn(State) + Send + Sync>>,
}

impl TunnelEngine {
    pub fn new(
        session: Session,
        transport: Box<dyn Transport>,
        authorizer: Arc<Authorizer>,
        config: EngineConfig,
    ) -> Self {
        Self {
            session,
            transport: Arc::new(AsyncMutex::new(transport)),
            authorizer,
            config,
            state_observer: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Registers a callback invoked on every state transition, in addition
    /// to (not instead of) `self.session.state` itself. The façade uses this
    /// to mirror transitions into its own session registry; the engine
    /// never reads the registry back.
    pub fn set_state_observer<F>(&mut self, observer: F)
    where
        F: Fn(State) + Send + Sync + 'static,
    {
        self.state_observer = Some(Box::new(observer));
    }

    fn transition(&mut self, state: State) {
        self.session.state = state;
        if let Some(observer) = &self.state_observer {
            observer(state);
        }
    }

    /// Drives the session to `CLOSED`. Returns `Ok(())` on a clean close
    /// (including a policy-directed close such as `HOST_DENIED`) and `Err`
    /// for everything that isn't part of the normal lifecycle. Callers
    /// (the façade) log the `Err` case; both cases release the transport.
    pub async fn run(&mut self) -> Result<(), Error> {
        let result = self.drive().await;

        if let Err(err) = &result {
            self.send_close_channel_best_effort(err.kind).await;
        }

        {
            let mut transport = self.transport.lock().await;
            transport.close().await;
        }
        self.transition(State::Closed);

        result
    }

    /// `spec.md` §4.3's "any -> transport EOF / error" row and §5's
    /// cancellation policy both require a server-initiated CLOSE_CHANNEL
    /// once a channel exists and the session ends for any reason other than
    /// the client closing it itself. Only reachable once `opened()` has run
    /// (a channel exists to close); best-effort, so a write failure here is
    /// swallowed, not propagated.
    async fn send_close_channel_best_effort(&self, kind: ErrorKind) {
        if self.session.state != State::Opened {
            return;
        }
        if !matches!(
            kind,
            ErrorKind::Idle
                | ErrorKind::ReauthFailed
                | ErrorKind::BackendUnavailable
                | ErrorKind::Transport
        ) {
            return;
        }

        let packet = Packet::CloseChannel(CloseChannel { reason: E_FAIL });
        let mut transport = self.transport.lock().await;
        let _ = transport.write_packet(&packet).await;
    }

    async fn drive(&mut self) -> Result<(), Error> {
        self.handshake().await?;
        self.tunnel_create().await?;
        self.tunnel_auth().await?;
        self.channel_create().await?;
        self.opened().await
    }

    async fn read(&self) -> Result<Packet, Error> {
        let mut transport = self.transport.lock().await;
        match transport.read_packet().await {
            Ok(Some(packet)) => Ok(packet),
            Ok(None) => Err(Error::new(ErrorKind::Transport, "end of stream")),
            Err(crate::transport::TransportError::Decode(err)) => Err(Error::from(err)),
            Err(err) => Err(Error::new(ErrorKind::Transport, err.to_string())),
        }
    }

    async fn write(&self, packet: &Packet) -> Result<(), Error> {
        let mut transport = self.transport.lock().await;
        transport
            .write_packet(packet)
            .await
            .map_err(|err| Error::new(ErrorKind::Transport, err.to_string()))
    }

    /// INITIALIZED --HANDSHAKE_REQUEST--> HANDSHAKE
    async fn handshake(&mut self) -> Result<(), Error> {
        let packet = timeout(self.config.handshake_timeout, self.read())
            .await
            .map_err(|_| Error::new(ErrorKind::Transport, "handshake timed out"))??;

        let request = match packet {
            Packet::HandshakeRequest(body) => body,
            other => return self.protocol_violation(other),
        };

        if request.version != codec::header::PROTOCOL_VERSION {
            self.write(&Packet::HandshakeResponse(HandshakeResponse {
                error_code: E_FAIL,
                extended_auth_supported: ExtendedAuthFlags::default(),
            }))
            .await?;
            return Err(Error::new(
                ErrorKind::ProtocolViolation,
                format!("unsupported handshake version {}", request.version),
            ));
        }

        let mut supported = ExtendedAuthFlags::default();
        if self.authorizer.token_auth {
            supported.set(ExtendedAuthFlags::PAA);
        }
        if self.config.smart_card_auth {
            supported.set(ExtendedAuthFlags::SC);
        }

        self.write(&Packet::HandshakeResponse(HandshakeResponse {
            error_code: ERROR_SUCCESS,
            extended_auth_supported: supported,
        }))
        .await?;

        self.transition(State::Handshake);
        Ok(())
    }

    /// HANDSHAKE --TUNNEL_CREATE--> TUNNEL_CREATE
    async fn tunnel_create(&mut self) -> Result<(), Error> {
        let packet = self.read().await?;
        let request = match packet {
            Packet::TunnelCreate(body) => body,
            other => return self.protocol_violation(other),
        };

        if self.authorizer.token_auth {
            let cookie = match request.paa_cookie.as_deref() {
                Some(cookie) => cookie,
                None => {
                    self.send_tunnel_response_failure().await?;
                    return Err(Error::new(ErrorKind::AuthRejected, "missing PAA cookie"));
                }
            };

            let claims = match self.authorizer.paa_verifier.verify(cookie).await {
                Ok(claims) => claims,
                Err(reason) => {
                    self.send_tunnel_response_failure().await?;
                    return Err(Error::new(
                        ErrorKind::AuthRejected,
                        format!("PAA token rejected: {reason:?}"),
                    ));
                }
            };

            if self.authorizer.verify_client_ip
                && !self
                    .authorizer
                    .client_ip_guard
                    .check(self.session.client_addr.ip(), claims.client_ip)
            {
                self.send_tunnel_response_failure().await?;
                return Err(Error::new(
                    ErrorKind::AuthMismatch,
                    "client IP does not match PAA claims",
                ));
            }

            self.session.claims = Some(claims);
        }

        let tunnel_id = nonzero_random_u32();
        let mut caps = Capabilities::default();
        caps.set(Capabilities::IDLE_TIMEOUT);
        if self.config.enable_reauth {
            caps.set(Capabilities::REAUTH);
        }
        self.session.caps = caps;
        self.session.tunnel_id = Some(tunnel_id);

        self.write(&Packet::TunnelResponse(TunnelResponse {
            presence: presence::tunnel_response::TUNNEL_ID | presence::tunnel_response::CAPS,
            error_code: ERROR_SUCCESS,
            tunnel_id: Some(tunnel_id),
            caps: Some(caps),
            soh_request: None,
            consent_message: None,
        }))
        .await?;

        self.transition(State::TunnelCreate);
        Ok(())
    }

    async fn send_tunnel_response_failure(&self) -> Result<(), Error> {
        self.write(&Packet::TunnelResponse(TunnelResponse {
            presence: 0,
            error_code: E_FAIL,
            ..Default::default()
        }))
        .await
    }

    /// TUNNEL_CREATE --TUNNEL_AUTH--> TUNNEL_AUTHORIZE
    async fn tunnel_auth(&mut self) -> Result<(), Error> {
        let packet = self.read().await?;
        let request = match packet {
            Packet::TunnelAuth(body) => body,
            other => return self.protocol_violation(other),
        };

        log::trace!(
            "session {}: tunnel auth from client machine {:?}",
            self.session.id.0,
            request.client_machine_name
        );

        self.session.redirect_flags = self.config.redirect_flags;
        self.session.idle_timeout = self.config.idle_timeout as u64;

        self.write(&Packet::TunnelAuthResponse(TunnelAuthResponse {
            presence: presence::tunnel_auth_response::REDIR_FLAGS
                | presence::tunnel_auth_response::IDLE_TIMEOUT,
            error_code: ERROR_SUCCESS,
            redirect_flags: Some(self.config.redirect_flags),
            idle_timeout: Some(self.config.idle_timeout),
            soh_response: None,
        }))
        .await?;

        self.transition(State::TunnelAuthorize);
        Ok(())
    }

    /// TUNNEL_AUTHORIZE --CHANNEL_CREATE--> CHANNEL_CREATE or CLOSED
    async fn channel_create(&mut self) -> Result<(), Error> {
        let packet = self.read().await?;
        let request = match packet {
            Packet::ChannelCreate(body) => body,
            other => return self.protocol_violation(other),
        };

        let decision = self
            .authorizer
            .host_selector
            .select(&request.resource_names, self.session.claims.as_ref())
            .await;

        let target = match decision {
            HostDecision::Allow(target) => target,
            HostDecision::Denied => {
                self.write(&Packet::ChannelResponse(ChannelResponse {
                    presence: 0,
                    error_code: E_ACCESSDENIED,
                    ..Default::default()
                }))
                .await?;
                return Err(Error::new(ErrorKind::HostDenied, "host selection denied"));
            }
        };

        let backend_addr: SocketAddr = target
            .parse()
            .map_err(|_| Error::new(ErrorKind::Internal, format!("unresolvable host {target}")))?;

        let backend = match TcpStream::connect(backend_addr).await {
            Ok(stream) => stream,
            Err(err) => {
                self.write(&Packet::ChannelResponse(ChannelResponse {
                    presence: 0,
                    error_code: E_FAIL,
                    ..Default::default()
                }))
                .await?;
                return Err(Error::new(
                    ErrorKind::BackendUnavailable,
                    format!("dial {backend_addr} failed: {err}"),
                ));
            }
        };

        let channel_id = nonzero_random_u32();
        self.session.channel_id = Some(channel_id);
        self.session.backend_addr = Some(backend_addr);
        self.session.backend = Some(backend);

        self.write(&Packet::ChannelResponse(ChannelResponse {
            presence: presence::channel_response::CHANNELID,
            error_code: ERROR_SUCCESS,
            channel_id: Some(channel_id),
            auth_cookie: None,
            udp_port: None,
        }))
        .await?;

        self.transition(State::ChannelCreate);
        Ok(())
    }

    /// CHANNEL_CREATE -> OPENED, then the pump loop until CLOSED.
    async fn opened(&mut self) -> Result<(), Error> {
        let backend = self
            .session
            .backend
            .take()
            .expect("channel_create populates session.backend before opened() runs");

        self.transition(State::Opened);
        self.session.touch();

        let mut pump = Pump::spawn(self.transport.clone(), backend, self.config.receive_buf);
        let result = self.pump_loop(&mut pump).await;

        let (client_to_backend, backend_to_client) = pump.bytes_relayed();
        self.session.client_to_backend_bytes = client_to_backend;
        self.session.backend_to_client_bytes = backend_to_client;

        pump.shutdown().await;
        result
    }

    async fn next_inbound(&self) -> Result<Packet, Error> {
        if self.session.idle_timeout > 0 {
            let deadline = Duration::from_secs(self.session.idle_timeout);
            timeout(deadline, self.read())
                .await
                .map_err(|_| Error::new(ErrorKind::Idle, "no traffic within idle timeout"))?
        } else {
            self.read().await
        }
    }

    async fn pump_loop(&mut self, pump: &mut Pump) -> Result<(), Error> {
        loop {
            let packet = tokio::select! {
                result = self.next_inbound() => result?,
                _ = pump.backend_closed() => {
                    return Err(Error::new(
                        ErrorKind::BackendUnavailable,
                        "backend connection closed",
                    ));
                }
            };

            self.session.touch();

            match packet {
                Packet::Data(body) => {
                    pump.forward_to_backend(&body.payload)
                        .await
                        .map_err(|err| Error::new(ErrorKind::Transport, err.to_string()))?;
                }
                Packet::Keepalive => {
                    self.write(&Packet::Keepalive).await?;
                }
                Packet::ReauthMessage(body) => {
                    match self.authorizer.paa_verifier.verify(&body.paa_cookie).await {
                        Ok(claims) => self.session.claims = Some(claims),
                        Err(reason) => {
                            return Err(Error::new(
                                ErrorKind::ReauthFailed,
                                format!("reauth rejected: {reason:?}"),
                            ));
                        }
                    }
                }
                Packet::CloseChannel(CloseChannel { reason }) => {
                    self.write(&Packet::CloseChannelResponse(CloseChannelResponse {
                        error_code: ERROR_SUCCESS,
                    }))
                    .await?;
                    log::debug!(
                        "session {}: client closed channel, reason {reason}",
                        self.session.id.0
                    );
                    return Ok(());
                }
                other => return self.protocol_violation(other),
            }
        }
    }

    fn protocol_violation(&self, packet: Packet) -> Result<(), Error> {
        Err(Error::new(
            ErrorKind::ProtocolViolation,
            format!(
                "unexpected {:?} in state {:?}",
                packet.packet_type(),
                self.session.state
            ),
        ))
    }
}

fn nonzero_random_u32() -> u32 {
    loop {
        let candidate = rand::rng().random::<u32>();
        if candidate != 0 {
            return candidate;
        }
    }
}
