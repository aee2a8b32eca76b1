// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::{header::WWW_AUTHENTICATE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Startup / first-use configuration errors.
///
/// These are never produced for a well-configured deployment, so every
/// message says what to set.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("publishable key is missing; set AUTH_PUBLISHABLE_KEY")]
    MissingPublishableKey,

    #[error("publishable key is malformed: {0}")]
    InvalidPublishableKey(String),

    #[error("secret key is missing; set AUTH_SECRET_KEY")]
    MissingSecretKey,

    #[error(
        "request options carry a secret key but no encryption key is configured; \
         set AUTH_ENCRYPTION_KEY"
    )]
    MissingEncryptionKey,

    #[error("route pattern `{pattern}` is invalid: {reason}")]
    InvalidRoutePattern { pattern: String, reason: String },

    #[error("JWT verification key is invalid: {0}")]
    InvalidJwtKey(String),

    #[error("URL `{url}` is invalid: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request context could not be serialized: {0}")]
    ContextSerialization(String),
}

/// Errors escaping the gate middleware.
///
/// Protect signals never end up here: the orchestrator turns them into
/// responses. What remains is misconfiguration or a failure inside the
/// caller-supplied handler, which is passed through untouched.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("auth handler failed: {0}")]
    Handler(Box<dyn std::error::Error + Send + Sync>),
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "Auth gate failed");
        let reason = match &self {
            GateError::Config(_) => "configuration-error",
            GateError::Handler(_) => "handler-error",
        };
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, self.to_string(), reason).into_response()
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub reason: String,
    pub www_authenticate: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    reason: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            reason: reason.into(),
            www_authenticate: None,
        }
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized", reason)
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "Forbidden", reason)
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "Not Found", "not-found")
    }

    /// Attach a `WWW-Authenticate` challenge.
    pub fn with_challenge(mut self, challenge: impl Into<String>) -> Self {
        self.www_authenticate = Some(challenge.into());
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            reason: self.reason,
        });
        let mut response = (self.status, body).into_response();
        if let Some(challenge) = self
            .www_authenticate
            .and_then(|c| HeaderValue::from_str(&c).ok())
        {
            response.headers_mut().insert(WWW_AUTHENTICATE, challenge);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn constructors_set_status_and_reason() {
        let unauth = ApiError::unauthorized("signed-out");
        assert_eq!(unauth.status, StatusCode::UNAUTHORIZED);
        assert_eq!(unauth.reason, "signed-out");

        let forbidden = ApiError::forbidden("missing-role");
        assert_eq!(forbidden.status, StatusCode::FORBIDDEN);
        assert_eq!(forbidden.reason, "missing-role");

        let nf = ApiError::not_found();
        assert_eq!(nf.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn into_response_returns_json_body() {
        let response = ApiError::unauthorized("signed-out").into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body_bytes.to_vec()).unwrap();
        assert_eq!(body, r#"{"error":"Unauthorized","reason":"signed-out"}"#);
    }

    #[tokio::test]
    async fn challenge_sets_www_authenticate() {
        let response = ApiError::unauthorized("signed-out")
            .with_challenge("Bearer error=\"invalid_token\"")
            .into_response();
        assert_eq!(
            response.headers().get(WWW_AUTHENTICATE).unwrap(),
            "Bearer error=\"invalid_token\""
        );
    }

    #[test]
    fn config_errors_are_actionable() {
        let msg = ConfigError::MissingEncryptionKey.to_string();
        assert!(msg.contains("AUTH_ENCRYPTION_KEY"));
        let msg = ConfigError::MissingSecretKey.to_string();
        assert!(msg.contains("AUTH_SECRET_KEY"));
    }
}
