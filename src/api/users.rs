// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User endpoints.

use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::{AdminOnly, Auth, OptionalAuth, SignedIn};

/// Response for GET /v1/users/me
#[derive(Debug, Serialize, ToSchema)]
pub struct UserMeResponse {
    /// User ID for sessions, token subject for machine tokens
    pub user_id: String,
    /// Credential type (`session_token`, `api_key`, `oauth_token`, `m2m_token`)
    pub token_type: String,
    /// Session ID (if available)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Active organization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_role: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub org_permissions: Vec<String>,
}

impl From<SignedIn> for UserMeResponse {
    fn from(user: SignedIn) -> Self {
        let claims = user.session_claims();
        Self {
            org_id: claims.and_then(|c| c.org_id.clone()),
            org_role: claims.and_then(|c| c.org_role.clone()),
            org_permissions: claims.map(|c| c.org_permissions.clone()).unwrap_or_default(),
            token_type: user.token_type.to_string(),
            session_id: user.session_id,
            user_id: user.subject_id,
        }
    }
}

/// Response for GET /v1/session
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionStatusResponse {
    pub signed_in: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Get the current authenticated user's information.
///
/// This endpoint returns the identity and organization claims of the
/// currently authenticated caller.
#[utoipa::path(
    get,
    path = "/v1/users/me",
    tag = "Users",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "User information", body = UserMeResponse),
        (status = 401, description = "Unauthorized - invalid or missing token"),
    )
)]
pub async fn get_current_user(Auth(user): Auth) -> Json<UserMeResponse> {
    Json(user.into())
}

/// Whether the caller is signed in. Never rejects signed-out callers.
#[utoipa::path(
    get,
    path = "/v1/session",
    tag = "Users",
    responses(
        (status = 200, description = "Session status", body = SessionStatusResponse),
    )
)]
pub async fn get_session_status(OptionalAuth(user): OptionalAuth) -> Json<SessionStatusResponse> {
    Json(SessionStatusResponse {
        signed_in: user.is_some(),
        user_id: user.map(|u| u.subject_id),
    })
}

/// Admin-only echo of the caller identity.
#[utoipa::path(
    get,
    path = "/v1/admin/me",
    tag = "Users",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Admin information", body = UserMeResponse),
        (status = 401, description = "Unauthorized - invalid or missing token"),
        (status = 403, description = "Forbidden - admin role required"),
    )
)]
pub async fn get_admin(admin: AdminOnly) -> Json<UserMeResponse> {
    Json(admin.0.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::tests::sample_claims;

    #[test]
    fn user_me_response_from_session() {
        let user = SignedIn::from_session("tok", sample_claims());

        let response: UserMeResponse = user.into();
        assert_eq!(response.user_id, "user_123");
        assert_eq!(response.token_type, "session_token");
        assert_eq!(response.session_id, Some("sess_abc".to_string()));
        assert_eq!(response.org_role.as_deref(), Some("org:admin"));
        assert_eq!(response.org_permissions, vec!["org:invoices:create".to_string()]);
    }
}
