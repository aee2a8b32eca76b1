// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token authentication at the edge and trusted re-reads downstream.
//!
//! ## Edge
//!
//! [`authenticate_request`] looks for `Authorization: Bearer` first and the
//! `__session` cookie second. Header session tokens are verified directly;
//! cookie sessions go through the [`HandshakeCoordinator`]. Machine tokens
//! are recognized by prefix and left unverified here: their verification is
//! network-bound and done by [`authenticate_machine`].
//!
//! ## Downstream
//!
//! [`get_auth`] trusts the headers the gate stamped (`x-auth-*`), checks the
//! token signature binding, and takes machine identities from the
//! propagated context only.

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use tracing::debug;

use super::claims::SignedIn;
use super::error::AuthError;
use super::handshake::{append_set_cookies, HandshakeCoordinator, HandshakeState};
use super::headers::{
    AUTH_MESSAGE_HEADER, AUTH_REASON_HEADER, AUTH_SIGNATURE_HEADER, AUTH_STATUS_HEADER,
    AUTH_TOKEN_HEADER,
};
use super::jwks::KeyStore;
use super::state::{AuthReason, AuthState, AuthStatus, SignedOut};
use super::tokens::{AcceptsToken, MachineTokenVerifier, MachineVerifyError, TokenType};
use super::verify::{decode_unverified, sign_token, verify_session_token, verify_signature};
use crate::context::PropagatedContext;
use crate::options::AuthOptions;
use crate::request::{RequestInfo, RequestKind};

/// Outcome of edge authentication.
#[derive(Debug, Clone)]
pub struct RequestState {
    pub auth: AuthState,
    /// Headers (cookies) every response to this request must carry.
    pub response_headers: HeaderMap,
}

impl RequestState {
    pub fn new(auth: AuthState) -> Self {
        Self {
            auth,
            response_headers: HeaderMap::new(),
        }
    }

    /// Only page navigations with a safe method can follow a handshake
    /// redirect; anything else is answered as signed out with the same
    /// reason.
    pub fn settle_for(self, kind: RequestKind, method: &Method) -> Self {
        match self.auth {
            AuthState::Handshake(handshake) if !kind.accepts_handshake(method) => {
                let mut signed_out = SignedOut::new(handshake.reason);
                signed_out.message = handshake.message;
                Self {
                    auth: AuthState::SignedOut(signed_out),
                    response_headers: self.response_headers,
                }
            }
            auth => Self { auth, ..self },
        }
    }

    pub fn for_accepted(self, accepts: &AcceptsToken) -> Self {
        Self {
            auth: self.auth.for_accepted(accepts),
            ..self
        }
    }
}

/// Authenticate a request at the edge. CPU-only.
pub fn authenticate_request(
    request: &RequestInfo<'_>,
    options: &AuthOptions,
    keys: &KeyStore,
) -> RequestState {
    if let Some(token) = request.bearer_token() {
        let token_type = TokenType::classify(token);
        if token_type.is_machine() {
            return RequestState::new(AuthState::SignedOut(
                SignedOut::new(AuthReason::MachineTokenUnverified)
                    .with_token_type(Some(token_type)),
            ));
        }
        let auth = match verify_session_token(token, keys, options) {
            Ok(claims) => AuthState::SignedIn(SignedIn::from_session(token, claims)),
            Err(e) => {
                debug!(error = %e, "Bearer session token rejected");
                AuthState::SignedOut(
                    SignedOut::new(AuthReason::HeaderTokenInvalid).with_message(e.to_string()),
                )
            }
        };
        return RequestState::new(auth);
    }

    match HandshakeCoordinator::new(*request, options, keys).run() {
        HandshakeState::InFlight(handshake) => RequestState::new(AuthState::Handshake(handshake)),
        HandshakeState::Resolved { state, set_cookies } => {
            let mut response_headers = HeaderMap::new();
            append_set_cookies(&mut response_headers, &set_cookies);
            RequestState {
                auth: state,
                response_headers,
            }
        }
        HandshakeState::NeedsHandshake(needs) => {
            RequestState::new(AuthState::SignedOut(SignedOut::new(needs.reason)))
        }
    }
}

/// Verify a machine token with the configured verifier.
pub async fn authenticate_machine(
    token: &str,
    token_type: TokenType,
    verifier: &dyn MachineTokenVerifier,
) -> AuthState {
    match verifier.verify(token, token_type).await {
        Ok(identity) if identity.token_type == token_type => {
            AuthState::SignedIn(SignedIn::from_machine(token, identity))
        }
        Ok(identity) => AuthState::SignedOut(
            SignedOut::new(AuthReason::HeaderTokenInvalid)
                .with_token_type(Some(token_type))
                .with_message(format!(
                    "verifier returned a {} identity for a {token_type}",
                    identity.token_type
                )),
        ),
        Err(e @ MachineVerifyError::Rejected(_)) => AuthState::SignedOut(
            SignedOut::new(AuthReason::HeaderTokenInvalid)
                .with_token_type(Some(token_type))
                .with_message(e.to_string()),
        ),
        Err(e @ MachineVerifyError::Unavailable(_)) => AuthState::SignedOut(
            SignedOut::new(AuthReason::MachineTokenUnverified)
                .with_token_type(Some(token_type))
                .with_message(e.to_string()),
        ),
    }
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

/// Diagnostic headers shared by the downstream request and the response.
pub fn diagnostic_headers(state: &AuthState) -> HeaderMap {
    let mut headers = HeaderMap::new();
    insert_header(&mut headers, AUTH_STATUS_HEADER, state.status().as_str());
    if let Some(reason) = state.reason() {
        insert_header(&mut headers, AUTH_REASON_HEADER, reason.code());
    }
    if let Some(message) = state.message() {
        insert_header(&mut headers, AUTH_MESSAGE_HEADER, message);
    }
    headers
}

/// Stamp the auth headers downstream stages trust.
pub fn stamp_request_headers(headers: &mut HeaderMap, state: &AuthState, options: &AuthOptions) {
    for (name, value) in diagnostic_headers(state).iter() {
        headers.insert(name.clone(), value.clone());
    }
    if let AuthState::SignedIn(signed_in) = state {
        insert_header(headers, AUTH_TOKEN_HEADER, &signed_in.token);
        insert_header(
            headers,
            AUTH_SIGNATURE_HEADER,
            &sign_token(&signed_in.token, &options.secret_key),
        );
    }
}

/// Reconstruct the auth state from gate-stamped headers.
///
/// `context` is the decrypted propagated context, if any; when present its
/// options (including a per-request secret key) take precedence over
/// `options`.
pub fn get_auth(
    request: &RequestInfo<'_>,
    options: &AuthOptions,
    context: Option<&PropagatedContext>,
    accepts: &AcceptsToken,
) -> Result<AuthState, AuthError> {
    let status = request
        .header(AUTH_STATUS_HEADER)
        .ok_or(AuthError::MiddlewareNotDetected)?;

    let resolved = context.and_then(|ctx| ctx.resolve_options(options).ok());
    let options = resolved.as_ref().unwrap_or(options);

    if let Some(token) = request.bearer_token() {
        let token_type = TokenType::classify(token);
        if token_type.is_machine() {
            let state = match context.and_then(|ctx| ctx.machine_for(token)) {
                Some(identity) => {
                    AuthState::SignedIn(SignedIn::from_machine(token, identity.clone()))
                }
                None => AuthState::SignedOut(
                    SignedOut::new(AuthReason::MachineTokenUnverified)
                        .with_token_type(Some(token_type)),
                ),
            };
            return Ok(state.for_accepted(accepts));
        }
    }

    let state = match AuthStatus::parse(status) {
        Some(AuthStatus::SignedIn) => {
            let token = request
                .header(AUTH_TOKEN_HEADER)
                .ok_or(AuthError::TokenSignatureMismatch)?;
            let signature = request.header(AUTH_SIGNATURE_HEADER).unwrap_or_default();
            if !verify_signature(token, signature, &options.secret_key) {
                return Err(AuthError::TokenSignatureMismatch);
            }
            let claims = decode_unverified(token).map_err(|_| AuthError::MalformedToken)?;
            AuthState::SignedIn(SignedIn::from_session(token, claims))
        }
        _ => {
            let reason = request
                .header(AUTH_REASON_HEADER)
                .and_then(AuthReason::from_code)
                .unwrap_or(AuthReason::SignedOut);
            let mut signed_out = SignedOut::new(reason);
            signed_out.message = request.header(AUTH_MESSAGE_HEADER).map(str::to_string);
            AuthState::SignedOut(signed_out)
        }
    };
    Ok(state.for_accepted(accepts))
}
