use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};

mod api;
mod chat;
mod config;
mod error;
mod fallback;
mod framer;
mod models;
mod router;
mod upstream;

pub use config::Config;

const DEFAULT_CONFIG_PATH: &str = "/etc/you2api/config.toml";
const DEFAULT_LOG_FILTER: &str = "you2api=info,tower_http=warn";
const DEBUG_LOG_FILTER: &str = "you2api=debug,tower_http=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // When invoked as a Docker HEALTHCHECK, hit /healthz and exit immediately.
    // This avoids needing any external tool (curl/wget) in the container image.
    if std::env::args().nth(1).as_deref() == Some("--healthcheck") {
        return healthcheck().await;
    }

    let mut config = load_config()?;
    config.apply_env_flags(|name| std::env::var(name).ok());
    config.validate().context("invalid configuration")?;

    init_tracing(&config);

    info!(
        port = config.gateway.port,
        mode = %config.gateway.handler_mode,
        debug = config.gateway.debug,
        "you2api starting"
    );

    let config = Arc::new(config);
    let state = Arc::new(router::RouterState::new(Arc::clone(&config))?);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.gateway.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "client API listening");

    let trace_layer = tower_http::trace::TraceLayer::new_for_http()
        .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO))
        .on_response(tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO));

    let app = api::client::router(state)
        .layer(axum::middleware::from_fn(api::request_id::request_id_middleware))
        .layer(trace_layer);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("client API server error")?;

    info!("shutdown complete");
    Ok(())
}

/// `YOU2API_CONFIG` if set, else the default path if it exists, else the
/// built-in defaults.
fn load_config() -> anyhow::Result<Config> {
    if let Ok(path) = std::env::var("YOU2API_CONFIG") {
        let path = PathBuf::from(path);
        return Config::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()));
    }

    let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
    if default_path.exists() {
        return Config::load(&default_path)
            .with_context(|| format!("Failed to load config from {}", default_path.display()));
    }

    Ok(Config::default())
}

/// `RUST_LOG` wins; otherwise `gateway.log_level`, raised to debug when the
/// debug flag is on.
fn init_tracing(config: &Config) {
    let fallback = match (&config.gateway.log_level, config.gateway.debug) {
        (Some(level), true) => format!("{level},you2api=debug"),
        (Some(level), false) => level.clone(),
        (None, true) => DEBUG_LOG_FILTER.to_owned(),
        (None, false) => DEFAULT_LOG_FILTER.to_owned(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
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
    info!("shutdown signal received");
}

/// Lightweight healthcheck: GET /healthz and exit 0 on 200, 1 otherwise.
/// Invoked via `you2api --healthcheck` from Docker HEALTHCHECK.
async fn healthcheck() -> anyhow::Result<()> {
    let port = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(8080);

    let url = format!("http://127.0.0.1:{port}/healthz");
    let resp = reqwest::get(&url).await?;

    if resp.status().is_success() {
        std::process::exit(0);
    } else {
        std::process::exit(1);
    }
}
