//! Tesla API Gateway
//!
//! Single-binary Rust service that:
//! 1. Warms an OAuth session from the stored refresh token
//! 2. Listens for incoming requests
//! 3. Serves vehicle and energy-site data with managed bearer tokens
//! 4. Repairs a revoked refresh token at runtime via /login/*

mod config;
mod metrics;
mod routes;
mod service;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tesla_api::ApiClient;
use tesla_auth::{AuthClient, DeniedPrompt, Prompt, RefreshTokenStore, Session, StdinPrompt};

use crate::config::Config;
use crate::routes::{AppState, build_router};
use crate::service::{
    DRAIN_TIMEOUT, GatewayAction, GatewayEvent, GatewayMetrics, GatewayState, handle_event,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting tesla-gateway");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // --- State: Initializing ---
    let mut state = GatewayState::Initializing;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        api_base = %config.api.base_url,
        token_file = %config.auth.token_file.display(),
        interactive = config.auth.interactive,
        "configuration loaded"
    );

    // Transition: Initializing -> WarmingSession
    let (new_state, action) = handle_event(
        state,
        GatewayEvent::ConfigLoaded {
            listen_addr: config.server.listen_addr,
        },
    );
    state = new_state;
    info!(?action, "state: WarmingSession");

    match action {
        GatewayAction::WarmSession => {}
        _ => anyhow::bail!("unexpected action after ConfigLoaded: {action:?}"),
    };

    let http = reqwest::Client::new();

    // A headless gateway never prompts; the /login endpoints cover
    // re-authorization instead.
    let prompt: Arc<dyn Prompt> = if config.auth.interactive {
        Arc::new(StdinPrompt)
    } else {
        Arc::new(DeniedPrompt)
    };

    let session = Arc::new(Session::new(
        AuthClient::new(http.clone()),
        RefreshTokenStore::new(config.auth.token_file.clone()),
        prompt,
    ));

    if let Some(ref token) = config.auth.refresh_token {
        session
            .seed_refresh_token(token.expose())
            .await
            .context("failed to seed refresh token from environment")?;
    }

    // Execute WarmSession with retry loop: transport failures back off and
    // retry, an auth rejection starts the gateway in login-required mode.
    let (listen_addr, authenticated) = loop {
        match session.get_valid_token().await {
            Ok(_) => {
                let (new_state, action) = handle_event(state, GatewayEvent::SessionReady);
                state = new_state;
                match action {
                    GatewayAction::StartListener { addr } => break (addr, true),
                    _ => anyhow::bail!("unexpected action after SessionReady: {action:?}"),
                }
            }
            Err(tesla_auth::Error::Network(msg)) => {
                let (new_state, action) =
                    handle_event(state, GatewayEvent::SessionNetworkError(msg.clone()));
                state = new_state;

                match action {
                    GatewayAction::ScheduleRetry { delay } => {
                        warn!(
                            error = %msg,
                            retry_in_secs = delay.as_secs(),
                            "session warmup failed, retrying"
                        );
                        tokio::time::sleep(delay).await;

                        // RetryTimer transitions Backoff -> WarmingSession
                        let (new_state, _) = handle_event(state, GatewayEvent::RetryTimer);
                        state = new_state;
                    }
                    GatewayAction::Shutdown { exit_code } => {
                        error!(error = %msg, "session warmup failed after max retries");
                        std::process::exit(exit_code);
                    }
                    _ => anyhow::bail!("session warmup failed: {msg}"),
                }
            }
            Err(e) => {
                warn!(error = %e, "stored credentials rejected, starting in login-required mode");
                let (new_state, action) = handle_event(state, GatewayEvent::SessionLoginRequired);
                state = new_state;
                match action {
                    GatewayAction::StartListener { addr } => break (addr, false),
                    _ => anyhow::bail!("unexpected action after SessionLoginRequired: {action:?}"),
                }
            }
        }
    };

    if authenticated {
        info!("session ready");
    }

    let gateway_metrics = GatewayMetrics::new();

    let api = ApiClient::new(http, config.api.base_url.clone())
        .with_timeout(Duration::from_secs(config.api.timeout_secs));

    let app_state = AppState {
        session,
        api,
        metrics: gateway_metrics.clone(),
        prometheus: prometheus_handle,
    };

    let app = build_router(app_state, config.server.max_connections);

    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;

    // Transition: Starting -> Running
    let (new_state, _action) = handle_event(state, GatewayEvent::ListenerReady);
    state = new_state;
    info!(addr = %listen_addr, authenticated, "state: Running, accepting requests");

    // Clone in_flight counter for drain observability after shutdown
    let in_flight = gateway_metrics.in_flight.clone();

    // Graceful shutdown with drain timeout enforcement:
    // 1. shutdown_signal() fires on SIGTERM/SIGINT
    // 2. axum stops accepting new connections and drains in-flight requests
    // 3. DRAIN_TIMEOUT bounds the drain so a slow client cannot block exit
    //
    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts: notify the server to drain, then race the drain
    // against the timeout.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    // Wait for the OS signal
    shutdown_signal().await;

    // Transition: Running -> Draining
    let (new_state, _action) = handle_event(state, GatewayEvent::ShutdownSignal);
    state = new_state;
    info!("state: Draining");

    // Signal the server to begin draining
    let _ = shutdown_tx.send(());

    // Enforce the drain timeout; the timer starts at signal receipt
    let drain_event = match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
            GatewayEvent::DrainComplete
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
            GatewayEvent::DrainComplete
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
            GatewayEvent::DrainComplete
        }
        Err(_) => {
            let remaining = in_flight.load(Ordering::Relaxed);
            warn!(
                remaining,
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
            GatewayEvent::DrainTimeout
        }
    };

    // Transition: Draining -> Stopped
    let (state, action) = handle_event(state, drain_event);
    match action {
        GatewayAction::Shutdown { exit_code } if exit_code != 0 => {
            std::process::exit(exit_code);
        }
        _ => {}
    }
    info!(state = ?state, "shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
