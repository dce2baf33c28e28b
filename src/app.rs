/*
 * Responsibility
 * - Load Config → init tracing → build verifier/authorizer → assemble Router
 * - Apply HTTP middleware
 * - axum::serve() with graceful shutdown on SIGINT/SIGTERM
 */
use std::{panic, process};

use anyhow::Result;
use axum::Router;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, LogFormat};
use crate::services::auth::{build_authorizer, build_verifier};
use crate::state::AppState;
use crate::{api, middleware};

fn init_tracing(config: &Config) {
    // RUST_LOG wins; LOG_LEVEL is the fallback.
    // Ex:
    // RUST_LOG=info,oauth_guard=debug,tower_http=debug cargo run
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn init_panic_hook(abort_on_panic: bool) {
    // Keep the default hook as a fallback (prints to stderr with location/payload).
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        // Always surface panics via tracing so they don't get lost.
        tracing::error!(?info, "panic");

        // In development, fail fast so we notice immediately.
        if abort_on_panic {
            process::abort();
        } else {
            default_hook(info);
        }
    }))
}

fn log_config(config: &Config) {
    let issuers: Vec<&str> = config.issuers.iter().map(|c| c.issuer.as_str()).collect();

    info!(
        addr = %config.addr,
        app_env = ?config.app_env,
        issuers = ?issuers,
        audience = %config.audience,
        subject_policy = ?config.subject_policy,
        key_refresh_secs = config.key_refresh_interval.as_secs(),
        key_fetch_timeout_secs = config.key_fetch_timeout.as_secs(),
        token_leeway_secs = config.token_leeway_seconds,
        request_timeout_secs = config.request_timeout.as_secs(),
        rejection_status = config.rejection.status().as_u16(),
        "starting"
    );
}

pub async fn run() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config);
    init_panic_hook(!config.app_env.is_production());
    log_config(&config);

    let state = build_state(&config)?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    info!("listening on http://{}/", config.addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("terminated");
    Ok(())
}

pub fn build_state(config: &Config) -> Result<AppState> {
    let verifier = build_verifier(config)?;
    let authorizer = build_authorizer(&config.subject_policy)?;

    Ok(AppState::new(verifier, authorizer, config.rejection)
        .with_request_timeout(config.request_timeout))
}

pub fn build_router(state: AppState) -> Router {
    let policy = state.http_policy();
    middleware::http::apply(api::routes().with_state(state), policy)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received");
}
