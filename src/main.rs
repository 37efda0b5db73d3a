mod config;
mod error;
mod routes;
mod state;

use crate::config::RelayConfig;
use crate::error::RelayError;

#[tokio::main]
async fn main() -> Result<(), RelayError> {
    tracing_subscriber::fmt::init();

    let config = RelayConfig::from_env()?;
    let port = config.port;
    tracing::info!(
        publish = %config.publish_destination,
        subscribe_prefix = %config.subscribe_prefix,
        "relay configured"
    );

    let app = routes::app(state::RelayState::new(config));
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| RelayError::Bind { addr: addr.clone(), source })?;

    tracing::info!(%port, "everstar relay listening");
    axum::serve(listener, app).await.map_err(RelayError::Serve)
}
