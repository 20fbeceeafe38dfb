//! Static asset server for the built site (single-page app).
//!
//! Files under the dist directory are served as-is; any other path gets `index.html`
//! so client-side routes resolve.

use crate::config::{Config, ServerConfig};
use anyhow::{Context, Result};
use axum::Router;
use std::path::Path;
use tower_http::services::{ServeDir, ServeFile};

/// Router serving `dist_dir` with `index.html` as the fallback for unknown paths.
pub fn router(dist_dir: &Path) -> Router {
    let index = dist_dir.join("index.html");
    let assets = ServeDir::new(dist_dir).fallback(ServeFile::new(index));
    Router::new().fallback_service(assets)
}

/// Listen address for `config`. The port is taken as is; `PORT` is applied by
/// [`Config::with_env_overrides`], before any command-line override.
pub fn bind_addr(config: &ServerConfig) -> String {
    format!("{}:{}", config.bind, config.port)
}

/// Serve the built site until SIGINT/SIGTERM.
pub async fn run_server(config: &Config) -> Result<()> {
    let dist_dir = &config.server.dist_dir;
    if !dist_dir.join("index.html").is_file() {
        log::warn!(
            "server: {} has no index.html; unknown routes will 404 until the site is built",
            dist_dir.display()
        );
    }
    let bind_addr = bind_addr(&config.server);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("server: serving {} on {}", dist_dir.display(), bind_addr);

    axum::serve(listener, router(dist_dir))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("static server exited")?;
    log::info!("server: stopped");
    Ok(())
}

/// Completes on Ctrl+C or SIGTERM.
pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}
