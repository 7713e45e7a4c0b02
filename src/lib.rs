pub mod api;
pub mod authorizer;
pub mod config;
pub mod facade;
pub mod monitor;
pub mod statistics;
pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;

use config::Config;
use facade::AppState;
use tokio::net::TcpListener;

/// Opened so integration tests and the binary crate share one entry point,
/// mirroring the teacher's `server_main`.
pub async fn server_main(config: Arc<Config>) -> anyhow::Result<()> {
    let listen = config.gateway.listen;
    let state = AppState::new(config);
    let app = api::router(state);

    log::info!("gateway server listening: {listen}");
    let listener = TcpListener::bind(listen).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
