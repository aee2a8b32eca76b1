// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Handshake state machine.
//!
//! Cookie-authenticated requests whose credentials cannot be trusted locally
//! are sent on a one-shot redirect to the frontend API, which answers with
//! fresh cookies. The server keeps nothing between the two legs: everything
//! travels in the `Location` URL and cookies.
//!
//! ## Rules (first match wins)
//!
//! | # | Condition | Outcome |
//! |---|-----------|---------|
//! | 0 | handshake payload present | resolve from payload cookies |
//! | 1 | development, `__dev_browser` query differs from cookie | `new-dev-browser` |
//! | 2 | `__client_uat` absent or `0` | `unexpected-cookie` with a session cookie |
//! | 3 | `__client_uat` positive | missing, stale, invalid or signed in |
//! | 4 | anything else | signed out (`unexpected`) |

use axum::http::{
    header::{CACHE_CONTROL, LOCATION, SET_COOKIE},
    HeaderMap, HeaderValue,
};
use base64ct::{Base64, Base64Unpadded, Base64Url, Base64UrlUnpadded, Encoding};
use tracing::warn;
use url::Url;

use super::claims::SignedIn;
use super::headers::{
    CLIENT_UAT_COOKIE, DEV_BROWSER, HANDSHAKE, HANDSHAKE_REASON_PARAM, HANDSHAKE_REDIRECT_COOKIE,
    REDIRECT_URL_PARAM, SESSION_COOKIE,
};
use super::jwks::KeyStore;
use super::state::{AuthReason, AuthState, Handshake, SignedOut};
use super::verify::{decode_unverified, verify_session_token};
use crate::options::AuthOptions;
use crate::request::RequestInfo;

/// Consecutive handshakes allowed before giving up.
const MAX_HANDSHAKE_REDIRECTS: u32 = 3;

/// Lifetime of the redirect loop counter, in seconds.
const HANDSHAKE_REDIRECT_MAX_AGE: u32 = 3;

const HANDSHAKE_PATH: &str = "/v1/client/handshake";

/// A refresh is required before the request can be trusted.
#[derive(Debug, Clone, PartialEq)]
pub struct NeedsHandshake {
    pub reason: AuthReason,
    pub message: Option<String>,
    /// Cookies to persist on the redirect.
    pub set_cookies: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum HandshakeState {
    NeedsHandshake(NeedsHandshake),
    /// The redirect has been built; the response is the handshake itself.
    InFlight(Handshake),
    /// Settled without a round trip. `set_cookies` must ride on whatever
    /// response the request ends with.
    Resolved {
        state: AuthState,
        set_cookies: Vec<String>,
    },
}

impl HandshakeState {
    fn needs(reason: AuthReason) -> Self {
        HandshakeState::NeedsHandshake(NeedsHandshake {
            reason,
            message: None,
            set_cookies: Vec::new(),
        })
    }

    fn resolved(state: AuthState) -> Self {
        HandshakeState::Resolved {
            state,
            set_cookies: Vec::new(),
        }
    }
}

/// Decides whether a cookie-authenticated request needs a handshake.
pub struct HandshakeCoordinator<'a> {
    request: RequestInfo<'a>,
    options: &'a AuthOptions,
    keys: &'a KeyStore,
}

impl<'a> HandshakeCoordinator<'a> {
    pub fn new(request: RequestInfo<'a>, options: &'a AuthOptions, keys: &'a KeyStore) -> Self {
        Self {
            request,
            options,
            keys,
        }
    }

    /// Run the transition rules. Never produces `InFlight`.
    pub fn evaluate(&self) -> HandshakeState {
        if let Some(payload) = self.handshake_payload() {
            return self.resolve_payload(&payload);
        }

        if self.options.is_development() {
            if let Some(query_id) = self.request.query_param(DEV_BROWSER) {
                if self.request.cookie(DEV_BROWSER) != Some(query_id.as_str()) {
                    return HandshakeState::NeedsHandshake(NeedsHandshake {
                        reason: AuthReason::NewDevBrowser,
                        message: None,
                        set_cookies: vec![format!(
                            "{DEV_BROWSER}={query_id}; Path=/; SameSite=Lax"
                        )],
                    });
                }
            }
        }

        let session = self.request.cookie(SESSION_COOKIE).filter(|s| !s.is_empty());
        let uat = self.request.cookie(CLIENT_UAT_COOKIE);

        if matches!(uat, None | Some("0")) {
            return match session {
                Some(_) => HandshakeState::needs(AuthReason::UnexpectedCookie),
                None => HandshakeState::resolved(AuthState::signed_out(
                    AuthReason::SessionTokenAndUatMissing,
                )),
            };
        }

        match uat.and_then(|v| v.parse::<i64>().ok()).filter(|v| *v > 0) {
            Some(uat) => self.evaluate_session(session, uat),
            None => {
                warn!(
                    path = %self.request.path(),
                    client_uat = uat.unwrap_or_default(),
                    "Unexpected handshake state, treating request as signed out"
                );
                HandshakeState::resolved(AuthState::signed_out(AuthReason::Unexpected))
            }
        }
    }

    fn evaluate_session(&self, session: Option<&str>, uat: i64) -> HandshakeState {
        let Some(token) = session else {
            return HandshakeState::needs(AuthReason::CookieTokenMissing);
        };

        if decode_unverified(token).is_ok_and(|claims| claims.iat < uat) {
            return HandshakeState::needs(AuthReason::CookieTokenStale);
        }

        match verify_session_token(token, self.keys, self.options) {
            Ok(claims) => HandshakeState::resolved(AuthState::SignedIn(SignedIn::from_session(
                token, claims,
            ))),
            Err(e) => HandshakeState::NeedsHandshake(NeedsHandshake {
                reason: AuthReason::CookieTokenInvalid,
                message: Some(e.to_string()),
                set_cookies: Vec::new(),
            }),
        }
    }

    fn handshake_payload(&self) -> Option<String> {
        self.request
            .query_param(HANDSHAKE)
            .or_else(|| self.request.cookie(HANDSHAKE).map(str::to_string))
            .filter(|p| !p.is_empty())
    }

    /// Return leg: apply the cookies the frontend API sent back.
    fn resolve_payload(&self, payload: &str) -> HandshakeState {
        let mut set_cookies = vec![format!("{HANDSHAKE}=; Path=/; Max-Age=0")];

        let Some(directives) = decode_payload(payload) else {
            return HandshakeState::Resolved {
                state: AuthState::SignedOut(
                    SignedOut::new(AuthReason::HandshakeTokenInvalid)
                        .with_message("handshake payload is malformed"),
                ),
                set_cookies,
            };
        };

        let session = directives
            .iter()
            .filter_map(|d| cookie_pair(d))
            .find(|(name, _)| *name == SESSION_COOKIE)
            .map(|(_, value)| value.to_string())
            .filter(|v| !v.is_empty());
        set_cookies.extend(directives);

        let state = match session {
            Some(token) => match verify_session_token(&token, self.keys, self.options) {
                Ok(claims) => AuthState::SignedIn(SignedIn::from_session(token, claims)),
                Err(e) => AuthState::SignedOut(
                    SignedOut::new(AuthReason::HandshakeTokenInvalid).with_message(e.to_string()),
                ),
            },
            None => AuthState::SignedOut(
                SignedOut::new(AuthReason::HandshakeTokenInvalid)
                    .with_message("handshake payload has no session cookie"),
            ),
        };
        HandshakeState::Resolved { state, set_cookies }
    }

    /// Turn a pending handshake into the 307 that starts it.
    ///
    /// Falls back to signed out when the redirect loop guard trips or the
    /// frontend API URL cannot be built.
    pub fn begin(&self, needs: NeedsHandshake) -> AuthState {
        let attempts = self
            .request
            .cookie(HANDSHAKE_REDIRECT_COOKIE)
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0);
        if attempts >= MAX_HANDSHAKE_REDIRECTS {
            warn!(
                path = %self.request.path(),
                reason = %needs.reason,
                attempts,
                "Handshake redirect loop detected"
            );
            return AuthState::SignedOut(
                SignedOut::new(AuthReason::HandshakeRedirectLoop)
                    .with_message(format!("handshake requested for {}", needs.reason)),
            );
        }

        let location = match self.handshake_url(&needs) {
            Some(url) => url,
            None => {
                warn!(
                    frontend_api = %self.options.frontend_api_url(),
                    "Cannot build handshake URL"
                );
                return AuthState::SignedOut(
                    SignedOut::new(needs.reason).with_message("handshake URL is invalid"),
                );
            }
        };

        let secure = self
            .request
            .public_url()
            .is_some_and(|u| u.scheme() == "https");
        let mut cookies = needs.set_cookies;
        cookies.push(format!(
            "{HANDSHAKE_REDIRECT_COOKIE}={}; Path=/; Max-Age={HANDSHAKE_REDIRECT_MAX_AGE}; \
             SameSite=Lax; HttpOnly{}",
            attempts + 1,
            if secure { "; Secure" } else { "" }
        ));

        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(location.as_str()) {
            headers.insert(LOCATION, value);
        }
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        append_set_cookies(&mut headers, &cookies);

        AuthState::Handshake(Handshake {
            reason: needs.reason,
            message: needs.message,
            headers,
        })
    }

    /// Evaluate and, if needed, start the handshake.
    pub fn run(&self) -> HandshakeState {
        match self.evaluate() {
            HandshakeState::NeedsHandshake(needs) => match self.begin(needs) {
                AuthState::Handshake(h) => HandshakeState::InFlight(h),
                other => HandshakeState::resolved(other),
            },
            settled => settled,
        }
    }

    fn handshake_url(&self, needs: &NeedsHandshake) -> Option<Url> {
        let frontend_api = self.options.frontend_api_url();
        let base = match Url::parse(&frontend_api) {
            Ok(url) => url,
            // Relative proxy URL.
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                self.request.public_url()?.join(&frontend_api).ok()?
            }
            Err(_) => return None,
        };
        let mut url = Url::parse(&format!(
            "{}{HANDSHAKE_PATH}",
            base.as_str().trim_end_matches('/')
        ))
        .ok()?;

        let mut redirect = self.request.public_url()?;
        strip_query_params(&mut redirect, &[DEV_BROWSER, HANDSHAKE]);

        {
            let mut query = url.query_pairs_mut();
            query.append_pair(REDIRECT_URL_PARAM, redirect.as_str());
            query.append_pair(HANDSHAKE_REASON_PARAM, needs.reason.code());
            if self.options.is_development() {
                let dev_browser = self
                    .request
                    .query_param(DEV_BROWSER)
                    .or_else(|| self.request.cookie(DEV_BROWSER).map(str::to_string));
                if let Some(id) = dev_browser {
                    query.append_pair(DEV_BROWSER, &id);
                }
            }
        }
        Some(url)
    }
}

pub(crate) fn append_set_cookies(headers: &mut HeaderMap, cookies: &[String]) {
    for cookie in cookies {
        match HeaderValue::from_str(cookie) {
            Ok(value) => {
                headers.append(SET_COOKIE, value);
            }
            Err(_) => warn!("Dropping Set-Cookie directive that is not a valid header value"),
        }
    }
}

fn strip_query_params(url: &mut Url, names: &[&str]) {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !names.iter().any(|name| *k == **name))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
}

/// Decode a handshake payload: base64 of a JSON array of `Set-Cookie`
/// directives. Query decoding turns `+` into a space; that is undone first.
pub fn decode_payload(payload: &str) -> Option<Vec<String>> {
    let payload = payload.trim().replace(' ', "+");
    let bytes = Base64::decode_vec(&payload)
        .or_else(|_| Base64Unpadded::decode_vec(&payload))
        .or_else(|_| Base64Url::decode_vec(&payload))
        .or_else(|_| Base64UrlUnpadded::decode_vec(&payload))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Encode `Set-Cookie` directives as a handshake payload.
pub fn encode_payload(directives: &[String]) -> String {
    let json = serde_json::to_vec(directives).unwrap_or_default();
    Base64::encode_string(&json)
}

/// `name=value` at the head of a `Set-Cookie` directive.
fn cookie_pair(directive: &str) -> Option<(&str, &str)> {
    let pair = directive.split(';').next()?.trim();
    pair.split_once('=').map(|(k, v)| (k.trim(), v.trim()))
}
