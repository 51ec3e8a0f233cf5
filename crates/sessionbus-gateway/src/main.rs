//! Session bus gateway.
//!
//! - WebSocket endpoint: /v1/sessions/:session_id/ws
//! - One event hub, server transport and RPC manager per session
//! - Heartbeat ping + idle timeout

use std::net::SocketAddr;

use tracing_subscriber::{fmt, EnvFilter};

use sessionbus_core::error::{Result, SessionBusError};
use sessionbus_gateway::{app_state, config, router};

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = config::config_path();
    let cfg = config::load_from_file(&path)?;
    let listen: SocketAddr = cfg
        .gateway
        .listen
        .parse()
        .map_err(|e| SessionBusError::BadRequest(format!("gateway.listen must be a valid SocketAddr: {e}")))?;

    let state = app_state::AppState::new(cfg)?;
    let app = router::build_router(state);

    tracing::info!(%listen, config = %path.display(), "sessionbus-gateway starting");
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| SessionBusError::Internal(format!("bind failed: {e}")))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| SessionBusError::Internal(format!("server failed: {e}")))
}
