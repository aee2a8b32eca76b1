// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{env, net::SocketAddr, sync::Arc};

use axum::http::HeaderName;
use tokio_util::sync::CancellationToken;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use relational_edge_auth::{
    api::{router, RouteGuard},
    auth::{AuthGate, JwksManager, KeyStore},
    config::{
        DEFAULT_HOST, DEFAULT_LOG_FILTER, DEFAULT_PORT, ENCRYPTION_KEY_ENV, HOST_ENV,
        JWKS_URL_ENV, JWT_KEY_ENV, LOG_FORMAT_ENV, PORT_ENV,
    },
    context::RequestContextCodec,
    error::ConfigError,
    options::AuthOptions,
    state::AppState,
};

const REQUEST_ID_HEADER: &str = "x-request-id";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let options = AuthOptions::from_env()?;
    info!(options = %options.redacted(), "Loaded auth options");

    let cancel = CancellationToken::new();
    let keys = load_keys(&options, &cancel).await?;

    let codec = RequestContextCodec::new(env::var(ENCRYPTION_KEY_ENV).ok().as_deref())?;
    if !codec.is_enabled() {
        warn!(
            "{ENCRYPTION_KEY_ENV} is not set; \
             downstream handlers will not receive the request context"
        );
    }

    let gate = AuthGate::builder(options, keys)
        .codec(codec)
        .handler(RouteGuard::new()?)
        .build();

    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);
    let app = router(AppState::new(Arc::new(gate)))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid));

    let host = env::var(HOST_ENV).unwrap_or_else(|_| DEFAULT_HOST.to_string());
    let port: u16 = env::var(PORT_ENV)
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr: SocketAddr = format!("{host}:{port}").parse()?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Edge auth gate listening (docs at /docs)");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await?;
    Ok(())
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// Static PEM key when configured, otherwise a JWKS refreshed in the
/// background until shutdown.
async fn load_keys(
    options: &AuthOptions,
    cancel: &CancellationToken,
) -> Result<KeyStore, ConfigError> {
    if let Some(pem) = env::var(JWT_KEY_ENV).ok().filter(|v| !v.trim().is_empty()) {
        info!("Using static session verification key");
        return KeyStore::from_pem(&pem);
    }

    let manager = match env::var(JWKS_URL_ENV).ok().filter(|v| !v.trim().is_empty()) {
        Some(url) => JwksManager::new(url)?,
        None => JwksManager::for_frontend_api(&options.frontend_api_url())?,
    };

    match manager.refresh().await {
        Ok(count) => info!(count, url = %manager.jwks_url(), "Loaded JWKS"),
        Err(e) => warn!(
            error = %e,
            url = %manager.jwks_url(),
            "Initial JWKS fetch failed, retrying in the background"
        ),
    }
    tokio::spawn(manager.clone().run(cancel.clone()));

    Ok(KeyStore::Jwks(manager))
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
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

    info!("Shutting down");
    cancel.cancel();
}
