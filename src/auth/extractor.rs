// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for routes behind the auth gate.
//!
//! These never re-authenticate: they read the headers the gate stamped and
//! the propagated context, through [`get_auth`].
//!
//! ```rust,ignore
//! async fn my_handler(Auth(user): Auth) -> impl IntoResponse {
//!     // user is SignedIn
//! }
//! ```

use std::marker::PhantomData;

use axum::{extract::FromRequestParts, http::request::Parts};

use super::authenticator::get_auth;
use super::claims::SignedIn;
use super::state::AuthState;
use super::tokens::AcceptsToken;
use super::AuthError;
use crate::context::RequestScope;
use crate::request::RequestInfo;
use crate::state::AppState;

/// Auth state of the current request, as established by the gate.
fn auth_state(parts: &Parts, state: &AppState) -> Result<AuthState, AuthError> {
    let scope = parts
        .extensions
        .get::<RequestScope>()
        .cloned()
        .unwrap_or_else(|| RequestScope::from_headers(state.gate.codec().clone(), &parts.headers));
    get_auth(
        &RequestInfo::from_parts(parts),
        state.gate.options(),
        scope.context(),
        &AcceptsToken::Any,
    )
}

/// Extractor for signed-in requests.
///
/// # Example
///
/// ```rust,ignore
/// async fn current_user(Auth(user): Auth) -> Json<UserMeResponse> {
///     Json(user.into())
/// }
/// ```
pub struct Auth(pub SignedIn);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match auth_state(parts, state)? {
            AuthState::SignedIn(signed_in) => Ok(Auth(signed_in)),
            other => Err(AuthError::Unauthenticated(
                other
                    .reason()
                    .map_or("signed-out", |reason| reason.code())
                    .to_string(),
            )),
        }
    }
}

/// Optional authentication extractor.
///
/// Yields `None` for signed-out requests. A missing gate or tampered
/// headers still reject.
pub struct OptionalAuth(pub Option<SignedIn>);

impl FromRequestParts<AppState> for OptionalAuth {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match auth_state(parts, state)? {
            AuthState::SignedIn(signed_in) => Ok(OptionalAuth(Some(signed_in))),
            _ => Ok(OptionalAuth(None)),
        }
    }
}

/// An organization role that [`RequireRole`] checks for.
pub trait RequiredRole: Send + Sync + 'static {
    const ROLE: &'static str;
}

pub struct AdminRole;

impl RequiredRole for AdminRole {
    const ROLE: &'static str = "org:admin";
}

/// Extractor that requires a specific organization role.
///
/// # Example
///
/// ```rust,ignore
/// async fn admin_only(RequireRole(user, _): RequireRole<AdminRole>) -> impl IntoResponse {
///     // Only admins can reach here
/// }
/// ```
pub struct RequireRole<R: RequiredRole>(pub SignedIn, pub PhantomData<R>);

/// Extractor that requires the admin role.
pub type AdminOnly = RequireRole<AdminRole>;

impl<R: RequiredRole> FromRequestParts<AppState> for RequireRole<R> {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Auth(user) = Auth::from_request_parts(parts, state).await?;

        if !user.has().role(R::ROLE) {
            return Err(AuthError::InsufficientPermissions);
        }

        Ok(RequireRole(user, PhantomData))
    }
}
