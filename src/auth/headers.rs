// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Header, cookie and query parameter names used by the gate.

use axum::http::HeaderMap;

use crate::context::REQUEST_DATA_HEADER;

// Stamped onto the request for downstream stages.
pub const AUTH_STATUS_HEADER: &str = "x-auth-status";
pub const AUTH_REASON_HEADER: &str = "x-auth-reason";
pub const AUTH_MESSAGE_HEADER: &str = "x-auth-message";
pub const AUTH_TOKEN_HEADER: &str = "x-auth-token";
pub const AUTH_SIGNATURE_HEADER: &str = "x-auth-signature";

/// Marks a redirect the gate generated itself.
pub const REDIRECT_TO_HEADER: &str = "x-auth-redirect-to";

pub const SESSION_COOKIE: &str = "__session";
pub const CLIENT_UAT_COOKIE: &str = "__client_uat";
pub const DEV_BROWSER: &str = "__dev_browser";
pub const HANDSHAKE: &str = "__handshake";
pub const HANDSHAKE_REDIRECT_COOKIE: &str = "__handshake_redirect";

pub const REDIRECT_URL_PARAM: &str = "redirect_url";
pub const HANDSHAKE_REASON_PARAM: &str = "handshake_reason";

/// Headers only the gate may set. Client-supplied copies are dropped before
/// anything downstream can read them.
pub const GATE_HEADERS: [&str; 7] = [
    AUTH_STATUS_HEADER,
    AUTH_REASON_HEADER,
    AUTH_MESSAGE_HEADER,
    AUTH_TOKEN_HEADER,
    AUTH_SIGNATURE_HEADER,
    REDIRECT_TO_HEADER,
    REQUEST_DATA_HEADER,
];

pub fn strip_gate_headers(headers: &mut HeaderMap) {
    for name in GATE_HEADERS {
        headers.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_spoofed_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTH_STATUS_HEADER, "signed-in".parse().unwrap());
        headers.insert(REQUEST_DATA_HEADER, "v1.x".parse().unwrap());
        headers.insert("accept", "text/html".parse().unwrap());
        strip_gate_headers(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("accept"));
    }
}
