// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-request authentication state.

use std::fmt;

use axum::http::HeaderMap;
use serde_json::json;

use super::claims::SignedIn;
use super::tokens::{AcceptsToken, TokenType};

/// Value of the `x-auth-status` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    SignedIn,
    SignedOut,
    Handshake,
}

impl AuthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthStatus::SignedIn => "signed-in",
            AuthStatus::SignedOut => "signed-out",
            AuthStatus::Handshake => "handshake",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "signed-in" => Some(AuthStatus::SignedIn),
            "signed-out" => Some(AuthStatus::SignedOut),
            "handshake" => Some(AuthStatus::Handshake),
            _ => None,
        }
    }
}

/// Stable reason codes for signed-out and handshake states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthReason {
    SignedOut,
    SessionTokenAndUatMissing,
    UnexpectedCookie,
    CookieTokenMissing,
    CookieTokenStale,
    CookieTokenInvalid,
    Unexpected,
    HandshakeTokenInvalid,
    HandshakeRedirectLoop,
    NewDevBrowser,
    HeaderTokenInvalid,
    MachineTokenUnverified,
    TokenTypeMismatch { presented: TokenType },
    IgnoredRoute,
}

impl AuthReason {
    pub fn code(&self) -> &'static str {
        match self {
            AuthReason::SignedOut => "signed-out",
            AuthReason::SessionTokenAndUatMissing => "session-token-and-uat-missing",
            AuthReason::UnexpectedCookie => "unexpected-cookie",
            AuthReason::CookieTokenMissing => "cookie-token-missing",
            AuthReason::CookieTokenStale => "cookie-token-stale",
            AuthReason::CookieTokenInvalid => "cookie-token-invalid",
            AuthReason::Unexpected => "unexpected",
            AuthReason::HandshakeTokenInvalid => "handshake-token-invalid",
            AuthReason::HandshakeRedirectLoop => "handshake-redirect-loop",
            AuthReason::NewDevBrowser => "new-dev-browser",
            AuthReason::HeaderTokenInvalid => "header-token-invalid",
            AuthReason::MachineTokenUnverified => "machine-token-unverified",
            AuthReason::TokenTypeMismatch { .. } => "token-type-mismatch",
            AuthReason::IgnoredRoute => "ignored-route",
        }
    }

    /// Parse a reason code read back from a stamped header.
    ///
    /// `token-type-mismatch` is not parsed: the presented type is not part of
    /// the code, and downstream re-applies token acceptance itself.
    pub fn from_code(code: &str) -> Option<Self> {
        let reason = match code {
            "signed-out" => AuthReason::SignedOut,
            "session-token-and-uat-missing" => AuthReason::SessionTokenAndUatMissing,
            "unexpected-cookie" => AuthReason::UnexpectedCookie,
            "cookie-token-missing" => AuthReason::CookieTokenMissing,
            "cookie-token-stale" => AuthReason::CookieTokenStale,
            "cookie-token-invalid" => AuthReason::CookieTokenInvalid,
            "unexpected" => AuthReason::Unexpected,
            "handshake-token-invalid" => AuthReason::HandshakeTokenInvalid,
            "handshake-redirect-loop" => AuthReason::HandshakeRedirectLoop,
            "new-dev-browser" => AuthReason::NewDevBrowser,
            "header-token-invalid" => AuthReason::HeaderTokenInvalid,
            "machine-token-unverified" => AuthReason::MachineTokenUnverified,
            "ignored-route" => AuthReason::IgnoredRoute,
            _ => return None,
        };
        Some(reason)
    }
}

impl fmt::Display for AuthReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignedOut {
    pub reason: AuthReason,
    pub message: Option<String>,
    /// Token type the caller should have presented, when known.
    pub token_type: Option<TokenType>,
}

impl SignedOut {
    pub fn new(reason: AuthReason) -> Self {
        Self {
            reason,
            message: None,
            token_type: Some(TokenType::SessionToken),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_token_type(mut self, token_type: Option<TokenType>) -> Self {
        self.token_type = token_type;
        self
    }
}

/// A handshake redirect the gate must return as-is.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub reason: AuthReason,
    pub message: Option<String>,
    /// `Location`, `Set-Cookie` and cache headers of the 307.
    pub headers: HeaderMap,
}

#[derive(Debug, Clone)]
pub enum AuthState {
    SignedIn(SignedIn),
    SignedOut(SignedOut),
    Handshake(Handshake),
}

impl AuthState {
    pub fn signed_out(reason: AuthReason) -> Self {
        AuthState::SignedOut(SignedOut::new(reason))
    }

    pub fn status(&self) -> AuthStatus {
        match self {
            AuthState::SignedIn(_) => AuthStatus::SignedIn,
            AuthState::SignedOut(_) => AuthStatus::SignedOut,
            AuthState::Handshake(_) => AuthStatus::Handshake,
        }
    }

    pub fn reason(&self) -> Option<AuthReason> {
        match self {
            AuthState::SignedIn(_) => None,
            AuthState::SignedOut(s) => Some(s.reason),
            AuthState::Handshake(h) => Some(h.reason),
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            AuthState::SignedIn(_) => None,
            AuthState::SignedOut(s) => s.message.as_deref(),
            AuthState::Handshake(h) => h.message.as_deref(),
        }
    }

    pub fn is_signed_in(&self) -> bool {
        matches!(self, AuthState::SignedIn(_))
    }

    pub fn signed_in(&self) -> Option<&SignedIn> {
        match self {
            AuthState::SignedIn(s) => Some(s),
            _ => None,
        }
    }

    pub fn token_type(&self) -> Option<TokenType> {
        match self {
            AuthState::SignedIn(s) => Some(s.token_type),
            AuthState::SignedOut(s) => s.token_type,
            AuthState::Handshake(_) => Some(TokenType::SessionToken),
        }
    }

    /// Restrict the state to the accepted token types.
    ///
    /// A signed-in identity of the wrong type becomes signed out with
    /// `token-type-mismatch`. For a single accepted type the signed-out
    /// state is of that type; for a list it carries no type.
    pub fn for_accepted(self, accepts: &AcceptsToken) -> Self {
        let presented = match &self {
            AuthState::SignedIn(s) => s.token_type,
            AuthState::SignedOut(s) => match s.token_type {
                Some(t) => t,
                None => return self,
            },
            AuthState::Handshake(_) => return self,
        };
        if accepts.accepts(presented) {
            return self;
        }

        let token_type = match accepts {
            AcceptsToken::One(t) => Some(*t),
            AcceptsToken::AnyOf(_) | AcceptsToken::Any => None,
        };
        let reason = match &self {
            AuthState::SignedIn(_) => AuthReason::TokenTypeMismatch { presented },
            AuthState::SignedOut(s) => s.reason,
            AuthState::Handshake(h) => h.reason,
        };
        AuthState::SignedOut(SignedOut {
            reason,
            message: Some(format!("token type {presented} is not accepted ({accepts})")),
            token_type,
        })
    }

    /// Log-safe summary; never includes the raw token.
    pub fn summary(&self) -> serde_json::Value {
        match self {
            AuthState::SignedIn(s) => json!({
                "status": AuthStatus::SignedIn.as_str(),
                "subject_id": s.subject_id,
                "session_id": s.session_id,
                "token_type": s.token_type.as_str(),
            }),
            other => json!({
                "status": other.status().as_str(),
                "reason": other.reason().map(|r| r.code()),
                "message": other.message(),
                "token_type": other.token_type().map(|t| t.as_str()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::tests::sample_claims;
    use crate::auth::tokens::MachineIdentity;

    fn machine_state(token_type: TokenType) -> AuthState {
        AuthState::SignedIn(SignedIn::from_machine(
            "mt_x",
            MachineIdentity {
                token_type,
                id: "rec".to_string(),
                subject: "mch_1".to_string(),
                name: None,
                scopes: vec![],
                claims: Default::default(),
            },
        ))
    }

    #[test]
    fn reason_codes_round_trip() {
        for reason in [
            AuthReason::SignedOut,
            AuthReason::SessionTokenAndUatMissing,
            AuthReason::UnexpectedCookie,
            AuthReason::CookieTokenMissing,
            AuthReason::CookieTokenStale,
            AuthReason::CookieTokenInvalid,
            AuthReason::Unexpected,
            AuthReason::HandshakeTokenInvalid,
            AuthReason::HandshakeRedirectLoop,
            AuthReason::NewDevBrowser,
            AuthReason::HeaderTokenInvalid,
            AuthReason::MachineTokenUnverified,
            AuthReason::IgnoredRoute,
        ] {
            assert_eq!(AuthReason::from_code(reason.code()), Some(reason));
        }
        assert_eq!(AuthReason::from_code("token-type-mismatch"), None);
    }

    #[test]
    fn machine_token_rejected_by_session_acceptance() {
        let state = machine_state(TokenType::M2mToken).for_accepted(&AcceptsToken::session());
        let AuthState::SignedOut(out) = state else {
            panic!("expected signed out");
        };
        assert_eq!(
            out.reason,
            AuthReason::TokenTypeMismatch {
                presented: TokenType::M2mToken
            }
        );
        assert_eq!(out.token_type, Some(TokenType::SessionToken));
    }

    #[test]
    fn list_mismatch_has_no_token_type() {
        let accepts = AcceptsToken::AnyOf(vec![TokenType::ApiKey, TokenType::OauthToken]);
        let state = machine_state(TokenType::M2mToken).for_accepted(&accepts);
        assert_eq!(state.token_type(), None);
        assert_eq!(state.reason().map(|r| r.code()), Some("token-type-mismatch"));
    }

    #[test]
    fn single_machine_type_signs_out_as_that_type() {
        let session = AuthState::SignedIn(SignedIn::from_session("tok", sample_claims()));
        let state = session.for_accepted(&AcceptsToken::One(TokenType::ApiKey));
        assert_eq!(state.token_type(), Some(TokenType::ApiKey));
        assert!(!state.is_signed_in());
    }

    #[test]
    fn accepted_states_are_untouched() {
        let state = machine_state(TokenType::ApiKey).for_accepted(&AcceptsToken::Any);
        assert!(state.is_signed_in());

        let out =
            AuthState::signed_out(AuthReason::SignedOut).for_accepted(&AcceptsToken::session());
        assert_eq!(out.reason(), Some(AuthReason::SignedOut));
    }

    #[test]
    fn summary_omits_token() {
        let state = AuthState::SignedIn(SignedIn::from_session("secret-token", sample_claims()));
        let text = state.summary().to_string();
        assert!(text.contains("user_123"));
        assert!(!text.contains("secret-token"));
    }
}
