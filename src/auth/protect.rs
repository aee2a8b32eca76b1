// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authorization decisions.
//!
//! [`Protect`] accumulates requirements; [`evaluate`] checks them against an
//! [`AuthState`]; [`protect`] turns a failed check into the signal that fits
//! the calling context. Nothing here builds an HTTP response until a
//! [`ProtectSignal`] is converted at the gate boundary.

use std::fmt;
use std::sync::Arc;

use axum::http::{header::LOCATION, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use url::form_urlencoded;

use super::claims::SignedIn;
use super::headers::{REDIRECT_TO_HEADER, REDIRECT_URL_PARAM};
use super::roles::Has;
use super::state::{AuthReason, AuthState};
use super::tokens::{AcceptsToken, TokenType};
use crate::error::ApiError;
use crate::request::RequestKind;

pub type HasPredicate = Arc<dyn Fn(&Has<'_>) -> bool + Send + Sync>;
pub type UnauthenticatedHandler = Arc<dyn Fn(&AuthState) -> ProtectSignal + Send + Sync>;

/// One requirement fragment.
#[derive(Clone)]
pub enum Requirement {
    Role(String),
    Permission(String),
    TokenType(AcceptsToken),
    Predicate(HasPredicate),
}

impl fmt::Debug for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Role(r) => f.debug_tuple("Role").field(r).finish(),
            Requirement::Permission(p) => f.debug_tuple("Permission").field(p).finish(),
            Requirement::TokenType(t) => f.debug_tuple("TokenType").field(t).finish(),
            Requirement::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Why a protect check failed. The code is the stable `reason` clients see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    SignedOut,
    TokenTypeMismatch,
    MissingRole,
    MissingPermission,
    RequirementFailed,
}

impl DenyReason {
    pub fn code(self) -> &'static str {
        match self {
            DenyReason::SignedOut => "signed-out",
            DenyReason::TokenTypeMismatch => "token-type-mismatch",
            DenyReason::MissingRole => "missing-role",
            DenyReason::MissingPermission => "missing-permission",
            DenyReason::RequirementFailed => "requirement-failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// No acceptable identity.
    Unauthenticated {
        reason: DenyReason,
        token_type: Option<TokenType>,
    },
    /// Signed in, but a requirement failed.
    Unauthorized { reason: DenyReason },
}

/// Check requirements against a state.
///
/// Token-type requirements run first and fail as unauthenticated. The
/// remaining requirements run in registration order; the first failure is
/// reported.
pub fn evaluate(state: &AuthState, requirements: &[Requirement]) -> Decision {
    let signed_in = match state {
        AuthState::SignedIn(s) => s,
        other => {
            let reason = match other.reason() {
                Some(AuthReason::TokenTypeMismatch { .. }) => DenyReason::TokenTypeMismatch,
                _ => DenyReason::SignedOut,
            };
            return Decision::Unauthenticated {
                reason,
                token_type: other.token_type(),
            };
        }
    };

    for requirement in requirements {
        if let Requirement::TokenType(accepts) = requirement {
            if !accepts.accepts(signed_in.token_type) {
                return Decision::Unauthenticated {
                    reason: DenyReason::TokenTypeMismatch,
                    token_type: Some(signed_in.token_type),
                };
            }
        }
    }

    let has = signed_in.has();
    for requirement in requirements {
        let failed = match requirement {
            Requirement::Role(role) => (!has.role(role)).then_some(DenyReason::MissingRole),
            Requirement::Permission(permission) => {
                (!has.permission(permission)).then_some(DenyReason::MissingPermission)
            }
            Requirement::Predicate(predicate) => {
                (!predicate(&has)).then_some(DenyReason::RequirementFailed)
            }
            Requirement::TokenType(_) => None,
        };
        if let Some(reason) = failed {
            return Decision::Unauthorized { reason };
        }
    }

    Decision::Allow
}

/// Overrides for the failure behavior.
#[derive(Clone, Default)]
pub struct ProtectOptions {
    pub unauthenticated_url: Option<String>,
    pub unauthorized_url: Option<String>,
    pub on_unauthenticated: Option<UnauthenticatedHandler>,
}

impl fmt::Debug for ProtectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtectOptions")
            .field("unauthenticated_url", &self.unauthenticated_url)
            .field("unauthorized_url", &self.unauthorized_url)
            .field("on_unauthenticated", &self.on_unauthenticated.is_some())
            .finish()
    }
}

/// Builder for a protect check.
///
/// ```rust,ignore
/// auth.protect(&Protect::new().with_role("admin").with_permission("org:invoices:create"))?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct Protect {
    requirements: Vec<Requirement>,
    options: ProtectOptions,
}

impl Protect {
    /// Any signed-in identity.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    pub fn with_role(self, role: impl Into<String>) -> Self {
        self.with(Requirement::Role(role.into()))
    }

    pub fn with_permission(self, permission: impl Into<String>) -> Self {
        self.with(Requirement::Permission(permission.into()))
    }

    pub fn with_token_type(self, accepts: impl Into<AcceptsToken>) -> Self {
        self.with(Requirement::TokenType(accepts.into()))
    }

    pub fn with_predicate<F>(self, predicate: F) -> Self
    where
        F: Fn(&Has<'_>) -> bool + Send + Sync + 'static,
    {
        self.with(Requirement::Predicate(Arc::new(predicate)))
    }

    pub fn unauthenticated_url(mut self, url: impl Into<String>) -> Self {
        self.options.unauthenticated_url = Some(url.into());
        self
    }

    pub fn unauthorized_url(mut self, url: impl Into<String>) -> Self {
        self.options.unauthorized_url = Some(url.into());
        self
    }

    pub fn on_unauthenticated<F>(mut self, handler: F) -> Self
    where
        F: Fn(&AuthState) -> ProtectSignal + Send + Sync + 'static,
    {
        self.options.on_unauthenticated = Some(Arc::new(handler));
        self
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn options(&self) -> &ProtectOptions {
        &self.options
    }
}

/// Where a protect call runs.
#[derive(Debug, Clone)]
pub struct ProtectContext {
    pub kind: RequestKind,
    /// Absolute URL of the current request, sent back after sign-in.
    pub return_url: Option<String>,
    pub sign_in_url: String,
}

impl ProtectContext {
    /// `<sign in>?redirect_url=<current url>`.
    pub fn sign_in_location(&self) -> String {
        match &self.return_url {
            Some(return_url) => {
                let separator = if self.sign_in_url.contains('?') { '&' } else { '?' };
                let encoded: String =
                    form_urlencoded::byte_serialize(return_url.as_bytes()).collect();
                format!("{}{separator}{REDIRECT_URL_PARAM}={encoded}", self.sign_in_url)
            }
            None => self.sign_in_url.clone(),
        }
    }
}

/// Control-flow outcome of a failed protect check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtectSignal {
    RedirectToSignIn { location: String },
    /// `marked` redirects were generated by the gate and are eligible for
    /// dev-browser continuity.
    Redirect { location: String, marked: bool },
    Unauthorized {
        reason: DenyReason,
        oauth_challenge: bool,
    },
    Forbidden { reason: DenyReason },
    NotFound,
}

impl ProtectSignal {
    /// A plain redirect, as returned by application code.
    pub fn redirect(location: impl Into<String>) -> Self {
        ProtectSignal::Redirect {
            location: location.into(),
            marked: false,
        }
    }

    fn redirect_response(location: &str, marked: bool) -> Response {
        let mut response = StatusCode::TEMPORARY_REDIRECT.into_response();
        match HeaderValue::from_str(location) {
            Ok(value) => {
                response.headers_mut().insert(LOCATION, value);
            }
            Err(_) => {
                tracing::warn!("Protect redirect location is not a valid header value");
                return ApiError::not_found().into_response();
            }
        }
        if marked {
            response
                .headers_mut()
                .insert(REDIRECT_TO_HEADER, HeaderValue::from_static("true"));
        }
        response
    }
}

impl fmt::Display for ProtectSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtectSignal::RedirectToSignIn { location } => {
                write!(f, "redirect to sign-in ({location})")
            }
            ProtectSignal::Redirect { location, .. } => write!(f, "redirect ({location})"),
            ProtectSignal::Unauthorized { reason, .. } => {
                write!(f, "unauthorized ({})", reason.code())
            }
            ProtectSignal::Forbidden { reason } => write!(f, "forbidden ({})", reason.code()),
            ProtectSignal::NotFound => f.write_str("not found"),
        }
    }
}

impl IntoResponse for ProtectSignal {
    fn into_response(self) -> Response {
        match self {
            ProtectSignal::RedirectToSignIn { location } => {
                Self::redirect_response(&location, true)
            }
            ProtectSignal::Redirect { location, marked } => {
                Self::redirect_response(&location, marked)
            }
            ProtectSignal::Unauthorized {
                reason,
                oauth_challenge,
            } => {
                let error = ApiError::unauthorized(reason.code());
                if oauth_challenge {
                    error
                        .with_challenge("Bearer error=\"invalid_token\"")
                        .into_response()
                } else {
                    error.into_response()
                }
            }
            ProtectSignal::Forbidden { reason } => {
                ApiError::forbidden(reason.code()).into_response()
            }
            ProtectSignal::NotFound => ApiError::not_found().into_response(),
        }
    }
}

/// Enforce a protect check, yielding the state when it passes.
pub fn protect(
    state: &AuthState,
    check: &Protect,
    context: &ProtectContext,
) -> Result<AuthState, ProtectSignal> {
    let options = check.options();
    match evaluate(state, check.requirements()) {
        Decision::Allow => Ok(state.clone()),
        Decision::Unauthenticated { reason, token_type } => {
            if let Some(handler) = &options.on_unauthenticated {
                return Err(handler(state));
            }
            if let Some(url) = &options.unauthenticated_url {
                return Err(ProtectSignal::Redirect {
                    location: url.clone(),
                    marked: true,
                });
            }
            Err(match context.kind {
                RequestKind::Page => ProtectSignal::RedirectToSignIn {
                    location: context.sign_in_location(),
                },
                RequestKind::ApiOrData => ProtectSignal::Unauthorized {
                    reason,
                    oauth_challenge: token_type == Some(TokenType::OauthToken),
                },
                RequestKind::Deferred => ProtectSignal::NotFound,
            })
        }
        Decision::Unauthorized { reason } => {
            if let Some(url) = &options.unauthorized_url {
                return Err(ProtectSignal::Redirect {
                    location: url.clone(),
                    marked: true,
                });
            }
            Err(match context.kind {
                RequestKind::ApiOrData => ProtectSignal::Forbidden { reason },
                RequestKind::Page | RequestKind::Deferred => ProtectSignal::NotFound,
            })
        }
    }
}

/// The auth state bound to one request, handed to gate handlers.
#[derive(Debug, Clone)]
pub struct GateAuth {
    state: AuthState,
    context: ProtectContext,
}

impl GateAuth {
    pub fn new(state: AuthState, context: ProtectContext) -> Self {
        Self { state, context }
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    pub fn kind(&self) -> RequestKind {
        self.context.kind
    }

    pub fn signed_in(&self) -> Option<&SignedIn> {
        self.state.signed_in()
    }

    /// Run a protect check. Callable any number of times.
    pub fn protect(&self, check: &Protect) -> Result<AuthState, ProtectSignal> {
        protect(&self.state, check, &self.context)
    }

    /// Signal for sending the user to sign in from here.
    pub fn redirect_to_sign_in(&self) -> ProtectSignal {
        ProtectSignal::RedirectToSignIn {
            location: self.context.sign_in_location(),
        }
    }
}
