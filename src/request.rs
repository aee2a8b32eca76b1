// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Read-only request views shared by the matchers, the authenticator and
//! the protect engine.

use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, COOKIE, HOST},
    request::Parts,
    HeaderMap, Method, Request, Uri,
};
use url::Url;

pub const SEC_FETCH_DEST: &str = "sec-fetch-dest";
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";
pub const X_FORWARDED_PORT: &str = "x-forwarded-port";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Borrowed view over the parts of a request the gate inspects.
#[derive(Debug, Clone, Copy)]
pub struct RequestInfo<'a> {
    method: &'a Method,
    uri: &'a Uri,
    headers: &'a HeaderMap,
}

impl<'a> RequestInfo<'a> {
    pub fn new(method: &'a Method, uri: &'a Uri, headers: &'a HeaderMap) -> Self {
        Self {
            method,
            uri,
            headers,
        }
    }

    pub fn from_request<B>(request: &'a Request<B>) -> Self {
        Self::new(request.method(), request.uri(), request.headers())
    }

    pub fn from_parts(parts: &'a Parts) -> Self {
        Self::new(&parts.method, &parts.uri, &parts.headers)
    }

    pub fn method(&self) -> &'a Method {
        self.method
    }

    pub fn uri(&self) -> &'a Uri {
        self.uri
    }

    pub fn headers(&self) -> &'a HeaderMap {
        self.headers
    }

    /// Request path with the query stripped.
    pub fn path(&self) -> &'a str {
        self.uri.path()
    }

    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Value of a cookie, searching every `Cookie` header.
    pub fn cookie(&self, name: &str) -> Option<&'a str> {
        self.headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }

    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.uri.query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// Token from `Authorization: Bearer <token>`, if any.
    pub fn bearer_token(&self) -> Option<&'a str> {
        let value = self.headers.get(AUTHORIZATION)?.to_str().ok()?;
        let token = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))?
            .trim();
        (!token.is_empty()).then_some(token)
    }

    /// The URL the client actually requested, honouring `X-Forwarded-*`.
    pub fn public_url(&self) -> Option<Url> {
        let proto = self
            .forwarded(X_FORWARDED_PROTO)
            .or_else(|| self.uri.scheme_str())
            .unwrap_or("http");
        let host = self
            .forwarded(X_FORWARDED_HOST)
            .or_else(|| self.header(HOST.as_str()))
            .or_else(|| self.uri.authority().map(|a| a.as_str()))
            .unwrap_or("localhost");
        let port = self.forwarded(X_FORWARDED_PORT);

        let authority = match port {
            Some(port) if !host.contains(':') && !is_default_port(proto, port) => {
                format!("{host}:{port}")
            }
            _ => host.to_string(),
        };
        let path_and_query = self
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        Url::parse(&format!("{proto}://{authority}{path_and_query}")).ok()
    }

    /// Serialized origin of [`Self::public_url`].
    pub fn origin(&self) -> Option<String> {
        self.public_url().map(|u| u.origin().ascii_serialization())
    }

    pub fn snapshot(&self) -> RequestSnapshot {
        RequestSnapshot {
            method: self.method.clone(),
            uri: self.uri.clone(),
            headers: self.headers.clone(),
        }
    }

    fn forwarded(&self, name: &str) -> Option<&'a str> {
        self.header(name)
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

fn is_default_port(proto: &str, port: &str) -> bool {
    matches!((proto, port), ("http", "80") | ("https", "443"))
}

/// Owned copy of a request's head, handed to caller-supplied handlers.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl RequestSnapshot {
    pub fn info(&self) -> RequestInfo<'_> {
        RequestInfo::new(&self.method, &self.uri, &self.headers)
    }
}

/// The calling context a protect decision is made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// A browser navigation; failures redirect.
    Page,
    /// A programmatic call; failures answer with JSON.
    ApiOrData,
    /// Work running after the response was committed; failures can only
    /// be signalled as not-found.
    Deferred,
}

impl RequestKind {
    /// Classify a request from its headers.
    ///
    /// Checked in order:
    /// 1. `Sec-Fetch-Dest: document` or `iframe` is a page.
    /// 2. A path matched by the API route matcher is API.
    /// 3. `Content-Type: application/json` is API.
    /// 4. `Accept` containing `text/html` is a page.
    /// 5. Any other `Sec-Fetch-Dest` value (`empty`, `script`, ...) is API.
    /// 6. `Accept` naming JSON is API.
    /// 7. Everything else is a page.
    ///
    /// `Deferred` is never inferred from headers; background work opts in
    /// explicitly.
    pub fn classify(headers: &HeaderMap, is_api_route: bool) -> Self {
        let header = |name| headers.get(name).and_then(|v| v.to_str().ok());

        let dest = header(SEC_FETCH_DEST).map(str::to_ascii_lowercase);
        if matches!(dest.as_deref(), Some("document" | "iframe")) {
            return RequestKind::Page;
        }
        if is_api_route {
            return RequestKind::ApiOrData;
        }
        if header(CONTENT_TYPE.as_str()).is_some_and(|ct| ct.starts_with("application/json")) {
            return RequestKind::ApiOrData;
        }
        let accept = header(ACCEPT.as_str()).unwrap_or_default();
        if accept.contains("text/html") {
            return RequestKind::Page;
        }
        if dest.is_some() {
            return RequestKind::ApiOrData;
        }
        if accept.contains("application/json") {
            return RequestKind::ApiOrData;
        }
        RequestKind::Page
    }

    /// Whether a handshake redirect can be followed for this request.
    pub fn accepts_handshake(self, method: &Method) -> bool {
        self == RequestKind::Page && (*method == Method::GET || *method == Method::HEAD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str, headers: &[(&str, &str)]) -> Request<()> {
        let mut builder = Request::builder().uri(uri);
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn cookie_lookup_spans_headers() {
        let req = request(
            "/",
            &[("cookie", "a=1; __session=tok"), ("cookie", "__client_uat=42")],
        );
        let info = RequestInfo::from_request(&req);
        assert_eq!(info.cookie("__session"), Some("tok"));
        assert_eq!(info.cookie("__client_uat"), Some("42"));
        assert_eq!(info.cookie("missing"), None);
    }

    #[test]
    fn bearer_token_requires_scheme() {
        let req = request("/", &[("authorization", "Bearer abc")]);
        assert_eq!(RequestInfo::from_request(&req).bearer_token(), Some("abc"));

        let req = request("/", &[("authorization", "Basic abc")]);
        assert_eq!(RequestInfo::from_request(&req).bearer_token(), None);

        let req = request("/", &[("authorization", "Bearer   ")]);
        assert_eq!(RequestInfo::from_request(&req).bearer_token(), None);
    }

    #[test]
    fn public_url_honours_forwarded_headers() {
        let req = request(
            "/dashboard?tab=1",
            &[
                ("host", "internal:3000"),
                ("x-forwarded-host", "app.example.com"),
                ("x-forwarded-proto", "https"),
                ("x-forwarded-port", "443"),
            ],
        );
        let url = RequestInfo::from_request(&req).public_url().unwrap();
        assert_eq!(url.as_str(), "https://app.example.com/dashboard?tab=1");
    }

    #[test]
    fn public_url_appends_non_default_port() {
        let req = request(
            "/",
            &[
                ("x-forwarded-host", "app.example.com"),
                ("x-forwarded-proto", "https"),
                ("x-forwarded-port", "8443"),
            ],
        );
        let info = RequestInfo::from_request(&req);
        assert_eq!(info.origin().unwrap(), "https://app.example.com:8443");
    }

    #[test]
    fn query_param_decodes_values() {
        let req = request("/?__dev_browser=dvb%5F1&x=2", &[]);
        let info = RequestInfo::from_request(&req);
        assert_eq!(info.query_param("__dev_browser").as_deref(), Some("dvb_1"));
        assert_eq!(info.query_param("nope"), None);
    }

    #[test]
    fn classify_document_destination_is_page() {
        let req = request("/api/x", &[("sec-fetch-dest", "document")]);
        assert_eq!(RequestKind::classify(req.headers(), true), RequestKind::Page);
    }

    #[test]
    fn classify_api_route_and_json() {
        let req = request("/", &[]);
        assert_eq!(RequestKind::classify(req.headers(), true), RequestKind::ApiOrData);

        let req = request("/", &[("content-type", "application/json")]);
        assert_eq!(RequestKind::classify(req.headers(), false), RequestKind::ApiOrData);

        let req = request("/", &[("sec-fetch-dest", "empty")]);
        assert_eq!(RequestKind::classify(req.headers(), false), RequestKind::ApiOrData);

        let req = request("/", &[("accept", "application/json")]);
        assert_eq!(RequestKind::classify(req.headers(), false), RequestKind::ApiOrData);
    }

    #[test]
    fn classify_defaults_to_page() {
        let req = request("/", &[]);
        assert_eq!(RequestKind::classify(req.headers(), false), RequestKind::Page);

        let req = request("/", &[("accept", "text/html,application/xhtml+xml")]);
        assert_eq!(RequestKind::classify(req.headers(), false), RequestKind::Page);
    }

    #[test]
    fn handshake_only_for_page_reads() {
        assert!(RequestKind::Page.accepts_handshake(&Method::GET));
        assert!(!RequestKind::Page.accepts_handshake(&Method::POST));
        assert!(!RequestKind::ApiOrData.accepts_handshake(&Method::GET));
    }
}
