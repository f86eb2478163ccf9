//! Static dashboard server over the artifact directory.

use anyhow::Result;
use axum::Router;
use std::{net::SocketAddr, path::PathBuf};
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tracing::info;

/// Serves `webroot` (the monitor's artifact directory) at `addr` until
/// `cancel` fires.
pub async fn serve(addr: SocketAddr, webroot: PathBuf, cancel: CancellationToken) -> Result<()> {
    let app = Router::new().fallback_service(ServeDir::new(webroot));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(target: "monitor::server", %addr, "Dashboard listening");
    axum::serve(listener, app).with_graceful_shutdown(cancel.cancelled_owned()).await?;
    Ok(())
}
