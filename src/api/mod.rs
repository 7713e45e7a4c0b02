//! HTTP surface. `SPEC_FULL.md` §6.
//!
//! `POST`/`GET` `/remoteDesktopGateway/` are real: the former is the HTTP
//! dual-channel transport (distinguished by a `channel=in|out` query
//! parameter and paired by `id`, since axum routes standard HTTP methods
//! rather than the RDG extension verbs `RDG_IN_DATA`/`RDG_OUT_DATA`), the
//! latter upgrades to the WebSocket transport. `/connect`, `/callback`,
//! `/tokeninfo` are documented stand-ins; `/metrics` is a real exporter.

use std::net::SocketAddr;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::authorizer::sign_envelope;
use crate::facade::{handle_session, AppState};
use crate::transport::{http_dual, WebSocketTransport};

mod log_layer;

use log_layer::LogLayer;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/remoteDesktopGateway/",
            post(http_channel).get(websocket_upgrade),
        )
        .route("/connect", get(connect_stub))
        .route("/callback", get(callback_stub))
        .route("/tokeninfo", get(tokeninfo_stub))
        .route("/metrics", get(metrics))
        .layer(LogLayer)
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ChannelParams {
    channel: Channel,
    id: Uuid,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum Channel {
    In,
    Out,
}

async fn http_channel(
    State(state): State<AppState>,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    Query(params): Query<ChannelParams>,
    body: axum::body::Body,
) -> Response {
    match params.channel {
        Channel::In => {
            http_dual::deposit_in_channel(&state.pairing, params.id, body).await;
            StatusCode::NO_CONTENT.into_response()
        }
        Channel::Out => {
            match http_dual::accept_out_channel(&state.pairing, params.id, state.pairing_timeout())
                .await
            {
                Ok((transport, stream)) => {
                    tokio::spawn(handle_session(Box::new(transport), client_addr, state));
                    Response::new(axum::body::Body::from_stream(stream))
                }
                Err(err) => (StatusCode::GATEWAY_TIMEOUT, err.to_string()).into_response(),
            }
        }
    }
}

async fn websocket_upgrade(
    State(state): State<AppState>,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        let transport = WebSocketTransport::new(socket);
        handle_session(Box::new(transport), client_addr, state).await;
    })
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    remote_host: String,
    user: String,
}

#[derive(Debug, Serialize)]
struct ConnectResponse {
    paa_cookie: String,
}

/// Stand-in for the real PAA issuer: a user-facing web portal (RD Web
/// Access/RD Connection Broker in the original protocol) that authenticates
/// the user and mints a signed cookie naming the host they're entitled to.
/// This handler trusts `remote_host`/`user` from the query string outright,
/// which is only acceptable because it is explicitly a stand-in.
async fn connect_stub(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
) -> Json<ConnectResponse> {
    let claims = engine::Claims {
        remote_host: params.remote_host,
        client_ip: "0.0.0.0".parse().unwrap(),
        user: params.user,
        exp: u64::MAX,
    };
    let paa_cookie = sign_envelope(state.config.authorizer.hmac_key.as_bytes(), &claims);
    Json(ConnectResponse { paa_cookie })
}

/// Stand-in for the PAA issuer's callback leg (consent/redirect handling in
/// the original protocol). Not reimplemented.
async fn callback_stub() -> StatusCode {
    StatusCode::NOT_IMPLEMENTED
}

/// Stand-in for the token-introspection endpoint an external PAA issuer
/// would expose. Not reimplemented.
async fn tokeninfo_stub() -> StatusCode {
    StatusCode::NOT_IMPLEMENTED
}

#[cfg(feature = "metrics")]
async fn metrics() -> Result<Vec<u8>, StatusCode> {
    let mut buf = Vec::new();
    crate::statistics::prometheus::generate_metrics(&mut buf)
        .map(|_| buf)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

#[cfg(not(feature = "metrics"))]
async fn metrics() -> StatusCode {
    StatusCode::NOT_FOUND
}
