//! Wires a transport into a running [`TunnelEngine`] and reports the
//! outcome. `SPEC_FULL.md` §4.6 "Façade responsibilities".

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use engine::{EngineConfig, Error, ErrorKind, Session, SessionId, TunnelEngine};
use engine::authorizer::Authorizer;
use engine::transport::Transport;

use crate::authorizer::{ConfiguredHostSelector, StaticPaaVerifier, StrictClientIpGuard};
use crate::config::Config;
use crate::monitor::Monitor;
use crate::statistics::{Event, Statistics};
use crate::transport::PairingRegistry;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Everything a connection-handling axum route needs. Cloning is cheap:
/// every field is already `Arc`-backed or `Copy`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub authorizer: Arc<Authorizer>,
    pub monitor: Monitor,
    pub statistics: Statistics,
    pub pairing: PairingRegistry,
}

impl AppState {
    pub fn new(config: Arc<Config>) -> Self {
        let authorizer = Arc::new(Authorizer {
            token_auth: config.authorizer.token_auth,
            verify_client_ip: config.authorizer.verify_client_ip,
            paa_verifier: Box::new(StaticPaaVerifier::new(config.authorizer.hmac_key.clone())),
            host_selector: Box::new(ConfiguredHostSelector::new(
                config.authorizer.host_selection,
                config.authorizer.hosts.clone(),
            )),
            client_ip_guard: Box::new(StrictClientIpGuard),
        });

        Self {
            config,
            authorizer,
            monitor: Monitor::default(),
            statistics: Statistics::default(),
            pairing: PairingRegistry::new(),
        }
    }

    fn engine_config(&self) -> EngineConfig {
        let gateway = &self.config.gateway;
        EngineConfig {
            smart_card_auth: gateway.smart_card_auth,
            enable_reauth: gateway.enable_reauth,
            redirect_flags: (&gateway.redirect_flags).into(),
            idle_timeout: gateway.idle_timeout,
            send_buf: gateway.send_buf,
            receive_buf: gateway.receive_buf,
            handshake_timeout: Duration::from_secs(10),
        }
    }

    pub fn pairing_timeout(&self) -> Duration {
        Duration::from_secs(self.config.gateway.pairing_timeout)
    }
}

/// Drives one client connection from `INITIALIZED` to `CLOSED`. Spawned as
/// its own task by each transport's accept path; never returns an error to
/// its caller, since by the time a transport exists the HTTP response has
/// already committed -- failures are logged and folded into statistics.
pub async fn handle_session(transport: Box<dyn Transport>, client_addr: SocketAddr, state: AppState) {
    let id = SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed));
    let session = Session::new(id, client_addr);
    let actor = state.monitor.get_actor();
    actor.opened(id, client_addr);

    let mut engine = TunnelEngine::new(session, transport, state.authorizer.clone(), state.engine_config());
    {
        let actor = actor.clone();
        engine.set_state_observer(move |new_state| actor.set_state(id, new_state));
    }

    let task = tokio::spawn(async move {
        let result = engine.run().await;
        (engine, result)
    });

    let outcome = task.await;
    actor.closed(id);

    match outcome {
        Ok((engine, Ok(()))) => {
            log::info!(
                "session {}: closed cleanly in state {:?}",
                id.0,
                engine.session().state
            );
            report_relay_stats(&state.statistics, engine.session());
            state.statistics.report(Event::SessionClosed);
        }
        Ok((engine, Err(err))) => {
            log_session_error(id, &err);
            report_relay_stats(&state.statistics, engine.session());
            record_error(&state.statistics, &err);
            log::debug!("session {}: last state {:?}", id.0, engine.session().state);
        }
        Err(join_err) => {
            if join_err.is_panic() {
                log::error!("session {}: driver task panicked", id.0);
                state.statistics.report(Event::Error(ErrorKind::Internal));
            } else {
                log::warn!("session {}: driver task cancelled", id.0);
            }
        }
    }
}

/// A non-zero `channel_id` means `channel_create` succeeded, and `drive`
/// always runs `opened` right after -- the only way a session's byte
/// counters or `SessionOpened` event are meaningful.
fn report_relay_stats(statistics: &Statistics, session: &Session) {
    if session.channel_id.is_none() {
        return;
    }

    statistics.report(Event::SessionOpened);
    if session.client_to_backend_bytes > 0 {
        statistics.report(Event::ClientToBackendBytes(
            session.client_to_backend_bytes as usize,
        ));
    }
    if session.backend_to_client_bytes > 0 {
        statistics.report(Event::BackendToClientBytes(
            session.backend_to_client_bytes as usize,
        ));
    }
}

fn log_session_error(id: SessionId, err: &Error) {
    match err.kind {
        ErrorKind::Idle => log::info!("session {}: closed, idle timeout", id.0),
        ErrorKind::AuthRejected | ErrorKind::AuthMismatch | ErrorKind::HostDenied => {
            log::warn!("session {}: closed, {}", id.0, err)
        }
        _ => log::warn!("session {}: closed with error: {}", id.0, err),
    }
}

fn record_error(statistics: &Statistics, err: &Error) {
    statistics.report(Event::SessionClosed);
    statistics.report(Event::Error(err.kind));
    match err.kind {
        ErrorKind::AuthRejected | ErrorKind::AuthMismatch => {
            statistics.report(Event::AuthRejected)
        }
        ErrorKind::HostDenied => statistics.report(Event::HostDenied),
        ErrorKind::BackendUnavailable => statistics.report(Event::BackendDialFailed),
        _ => {}
    }
}
