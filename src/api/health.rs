// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::AppState;

/// Health check response with individual component status.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReadyResponse {
    /// Overall health status ("ok" or "degraded").
    pub status: String,
    /// Individual health checks and their results.
    pub checks: HealthChecks,
}

/// Individual health check results.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthChecks {
    /// Whether the service process is running.
    pub service: String,
    /// Session verification keys ("ok" or "unavailable").
    pub keys: String,
    /// Where verification keys come from ("static" or "jwks").
    pub key_source: String,
    /// Whether the request context header is encrypted.
    pub context_encryption: bool,
}

/// Simple health check response for liveness probes.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

/// Health check endpoint handler.
///
/// Returns 200 once verification keys are loaded, 503 before that.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = ReadyResponse),
        (status = 503, description = "Service is unhealthy", body = ReadyResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let keys = state.gate.keys();
    let keys_ok = keys.is_ready();

    let response = ReadyResponse {
        status: if keys_ok { "ok" } else { "degraded" }.to_string(),
        checks: HealthChecks {
            service: "ok".to_string(),
            keys: if keys_ok { "ok" } else { "unavailable" }.to_string(),
            key_source: keys.source().to_string(),
            context_encryption: state.gate.codec().is_enabled(),
        },
    };

    let status = if keys_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}

/// Liveness probe handler.
///
/// Always returns 200 if the process is running.
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "Health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    )
)]
pub async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness probe handler.
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Service is ready", body = ReadyResponse),
        (status = 503, description = "Service is not ready", body = ReadyResponse)
    )
)]
pub async fn readiness(state: State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    health(state).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwks::tests::{loaded_jwks_store, static_store};
    use crate::auth::jwks::{JwksManager, KeyStore};
    use crate::auth::middleware::AuthGate;
    use crate::options::tests::test_options;
    use std::sync::Arc;

    fn state_with(keys: KeyStore) -> AppState {
        AppState::new(Arc::new(AuthGate::builder(test_options(), keys).build()))
    }

    #[tokio::test]
    async fn static_key_is_healthy() {
        let (status, Json(body)) = health(State(state_with(static_store()))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.checks.key_source, "static");
        assert!(!body.checks.context_encryption);
    }

    #[tokio::test]
    async fn loaded_jwks_is_healthy() {
        let (status, Json(body)) = health(State(state_with(loaded_jwks_store()))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.checks.key_source, "jwks");
    }

    #[tokio::test]
    async fn empty_jwks_is_degraded() {
        let manager = JwksManager::new("https://clerk.example.com/.well-known/jwks.json").unwrap();
        let (status, Json(body)) = health(State(state_with(KeyStore::Jwks(manager)))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.status, "degraded");
        assert_eq!(body.checks.keys, "unavailable");
    }
}
