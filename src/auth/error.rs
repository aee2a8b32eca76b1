// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Why a session token failed verification.
///
/// Never surfaced to clients directly: the authenticator folds these into
/// signed-out or handshake states and keeps the message for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenVerificationError {
    #[error("token is malformed")]
    MalformedToken,
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token has expired")]
    TokenExpired,
    #[error("token is not yet valid")]
    TokenNotYetValid,
    #[error("token authorized party `{0}` is not accepted")]
    UnauthorizedParty(String),
    #[error("no verification key matches kid `{0}`")]
    NoMatchingKey(String),
    #[error("no verification keys are loaded")]
    KeysUnavailable,
}

impl TokenVerificationError {
    pub fn is_expired(&self) -> bool {
        matches!(self, TokenVerificationError::TokenExpired)
    }
}

/// Errors raised by downstream auth lookups.
#[derive(Debug)]
pub enum AuthError {
    /// The edge stage did not stamp auth headers onto this request.
    MiddlewareNotDetected,
    /// Stamped token does not carry a valid signature.
    TokenSignatureMismatch,
    /// Stamped token could not be decoded.
    MalformedToken,
    /// Request is not signed in.
    Unauthenticated(String),
    /// Signed in but missing a role or permission.
    InsufficientPermissions,
}

#[derive(Serialize)]
struct AuthErrorBody {
    error: String,
    reason: String,
}

impl AuthError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &str {
        match self {
            AuthError::MiddlewareNotDetected => "middleware-not-detected",
            AuthError::TokenSignatureMismatch => "token-signature-mismatch",
            AuthError::MalformedToken => "malformed-token",
            AuthError::Unauthenticated(reason) => reason,
            AuthError::InsufficientPermissions => "insufficient-permissions",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AuthError::InsufficientPermissions => StatusCode::FORBIDDEN,
            AuthError::MiddlewareNotDetected
            | AuthError::TokenSignatureMismatch
            | AuthError::MalformedToken => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MiddlewareNotDetected => write!(
                f,
                "auth headers are missing: the auth gate middleware did not run for this route; \
                 add `auth_gate_middleware` to the router or widen its route matcher"
            ),
            AuthError::TokenSignatureMismatch => write!(
                f,
                "stamped auth token signature does not match; \
                 the request was altered after the auth gate"
            ),
            AuthError::MalformedToken => write!(f, "stamped auth token is malformed"),
            AuthError::Unauthenticated(_) => write!(f, "Unauthenticated"),
            AuthError::InsufficientPermissions => {
                write!(f, "Insufficient permissions for this operation")
            }
        }
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if self.status_code().is_server_error() {
            tracing::error!(error = %self, "Auth lookup failed");
        }
        let status = self.status_code();
        let body = Json(AuthErrorBody {
            error: self.to_string(),
            reason: self.error_code().to_string(),
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn unauthenticated_returns_401() {
        let response = AuthError::Unauthenticated("signed-out".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(body["reason"], "signed-out");
    }

    #[tokio::test]
    async fn insufficient_permissions_returns_403() {
        let response = AuthError::InsufficientPermissions.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn middleware_not_detected_is_actionable() {
        let err = AuthError::MiddlewareNotDetected;
        assert!(err.to_string().contains("auth_gate_middleware"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
