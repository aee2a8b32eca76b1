// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Route classification.
//!
//! A [`RouteMatcher`] is compiled once from a [`RouteSpec`] and then shared
//! read-only between requests. Compilation is where bad patterns fail, so a
//! typo in a route list stops the service at startup instead of surfacing
//! on the first matching request.

use std::fmt;
use std::sync::Arc;

use axum::http::{HeaderMap, Method, Uri};
use regex::Regex;
use url::Url;

use crate::error::ConfigError;
use crate::request::RequestInfo;

/// Predicate over the full request.
pub type RoutePredicate = Arc<dyn Fn(&RequestInfo<'_>) -> bool + Send + Sync>;

/// Uncompiled description of a set of routes.
#[derive(Clone)]
pub enum RouteSpec {
    /// Path patterns such as `/dashboard(.*)` or `/orgs/:slug`.
    Patterns(Vec<String>),
    /// A single regular expression, used as-is.
    Regex(String),
    /// Several regular expressions, OR-combined.
    Regexes(Vec<String>),
    /// Arbitrary predicate; may look at method and headers.
    Predicate(RoutePredicate),
}

impl fmt::Debug for RouteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteSpec::Patterns(p) => f.debug_tuple("Patterns").field(p).finish(),
            RouteSpec::Regex(r) => f.debug_tuple("Regex").field(r).finish(),
            RouteSpec::Regexes(r) => f.debug_tuple("Regexes").field(r).finish(),
            RouteSpec::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl From<&str> for RouteSpec {
    fn from(pattern: &str) -> Self {
        RouteSpec::Patterns(vec![pattern.to_string()])
    }
}

impl From<Vec<&str>> for RouteSpec {
    fn from(patterns: Vec<&str>) -> Self {
        RouteSpec::Patterns(patterns.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for RouteSpec {
    fn from(patterns: [&str; N]) -> Self {
        RouteSpec::Patterns(patterns.iter().map(|p| p.to_string()).collect())
    }
}

type PathPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Clone)]
enum Inner {
    Regexes(Vec<Regex>),
    Path(PathPredicate),
    Predicate(RoutePredicate),
    Not(Box<Inner>),
}

impl Inner {
    /// `request` is `None` when only a bare path is known.
    fn eval(&self, path: &str, request: Option<&RequestInfo<'_>>) -> bool {
        match self {
            Inner::Regexes(regexes) => regexes.iter().any(|r| r.is_match(path)),
            Inner::Path(predicate) => predicate(path),
            Inner::Predicate(predicate) => match request {
                Some(request) => predicate(request),
                None => {
                    let uri = synthetic_uri(path);
                    let method = Method::GET;
                    let headers = HeaderMap::new();
                    predicate(&RequestInfo::new(&method, &uri, &headers))
                }
            },
            Inner::Not(inner) => !inner.eval(path, request),
        }
    }
}

/// A compiled, immutable route classifier.
#[derive(Clone)]
pub struct RouteMatcher {
    inner: Inner,
}

impl fmt::Debug for RouteMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteMatcher").finish_non_exhaustive()
    }
}

/// Framework-internal path prefix, never authenticated.
const INTERNAL_PREFIX: &str = "/_next";

/// Static asset extensions skipped by the default config matcher.
/// `js` is anchored at the end of the path, so `.json` still matches.
const STATIC_ASSET: &str =
    r"\.(?:html?|css|js|jpe?g|webp|png|gif|svg|ttf|woff2?|ico|csv|docx?|xlsx?|zip|webmanifest)$";

const API_PATTERNS: [&str; 2] = ["/api(.*)", "/trpc(.*)"];

impl RouteMatcher {
    pub fn compile(spec: impl Into<RouteSpec>) -> Result<Self, ConfigError> {
        let inner = match spec.into() {
            RouteSpec::Patterns(patterns) => Inner::Regexes(
                patterns
                    .iter()
                    .map(|p| build_regex(p, &pattern_to_regex(p)))
                    .collect::<Result<_, _>>()?,
            ),
            RouteSpec::Regex(source) => Inner::Regexes(vec![build_regex(&source, &source)?]),
            RouteSpec::Regexes(sources) => Inner::Regexes(
                sources
                    .iter()
                    .map(|s| build_regex(s, s))
                    .collect::<Result<_, _>>()?,
            ),
            RouteSpec::Predicate(predicate) => Inner::Predicate(predicate),
        };
        Ok(Self { inner })
    }

    /// Matcher that never matches.
    pub fn none() -> Self {
        Self {
            inner: Inner::Regexes(Vec::new()),
        }
    }

    pub fn from_predicate<F>(predicate: F) -> Self
    where
        F: Fn(&RequestInfo<'_>) -> bool + Send + Sync + 'static,
    {
        Self {
            inner: Inner::Predicate(Arc::new(predicate)),
        }
    }

    /// Logical complement of this matcher.
    pub fn negate(&self) -> Self {
        let inner = match &self.inner {
            Inner::Not(inner) => (**inner).clone(),
            other => Inner::Not(Box::new(other.clone())),
        };
        Self { inner }
    }

    /// The default "process this request" matcher: everything except
    /// framework internals and static assets, with API routes always
    /// processed.
    pub fn config_default() -> Self {
        let api = Self::api_default();
        let assets = Regex::new(STATIC_ASSET).ok();
        let predicate = move |path: &str| {
            if api.inner.eval(path, None) {
                return true;
            }
            let internal = path
                .strip_prefix(INTERNAL_PREFIX)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'));
            let asset = assets.as_ref().is_some_and(|re| re.is_match(path));
            !(internal || asset)
        };
        Self {
            inner: Inner::Path(Arc::new(predicate)),
        }
    }

    /// Exact complement of [`Self::config_default`].
    pub fn ignored_default() -> Self {
        Self::config_default().negate()
    }

    /// Default API route matcher (`/api(.*)`, `/trpc(.*)`).
    pub fn api_default() -> Self {
        let regexes = API_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(&pattern_to_regex(p)).ok())
            .collect();
        Self {
            inner: Inner::Regexes(regexes),
        }
    }

    /// Test a bare path. Anything from the first `?` or `#` on is dropped
    /// and patterns see the rest as given, even when it is not a valid URI.
    /// Request predicates see a synthetic `GET` for the path.
    pub fn test(&self, path: &str) -> bool {
        let path = path.find(['?', '#']).map_or(path, |end| &path[..end]);
        self.inner.eval(path, None)
    }

    pub fn matches(&self, request: &RequestInfo<'_>) -> bool {
        self.inner.eval(request.path(), Some(request))
    }
}

/// URI for a bare path, percent-encoding what a request target cannot carry.
fn synthetic_uri(path: &str) -> Uri {
    if let Ok(uri) = path.parse::<Uri>() {
        return uri;
    }
    Url::parse("http://localhost/")
        .and_then(|base| base.join(path))
        .ok()
        .and_then(|url| url.path().parse::<Uri>().ok())
        .unwrap_or_else(|| Uri::from_static("/"))
}

fn build_regex(original: &str, source: &str) -> Result<Regex, ConfigError> {
    Regex::new(source).map_err(|e| ConfigError::InvalidRoutePattern {
        pattern: original.to_string(),
        reason: e.to_string(),
    })
}

/// Translate a path pattern into an anchored regex.
///
/// Parenthesised groups are copied verbatim, `:name` matches one path
/// segment and every other character is literal. One trailing slash is
/// tolerated.
fn pattern_to_regex(pattern: &str) -> String {
    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '(' => {
                let mut depth = 1;
                out.push('(');
                for inner in chars.by_ref() {
                    match inner {
                        '(' => depth += 1,
                        ')' => depth -= 1,
                        _ => {}
                    }
                    out.push(inner);
                    if depth == 0 {
                        break;
                    }
                }
            }
            ':' if chars.peek().is_some_and(|n| n.is_ascii_alphabetic() || *n == '_') => {
                while chars
                    .peek()
                    .is_some_and(|n| n.is_ascii_alphanumeric() || *n == '_')
                {
                    chars.next();
                }
                out.push_str("([^/]+?)");
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }

    if !out.ends_with('/') {
        out.push_str("/?");
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_suffix_matches_nested_paths() {
        let m = RouteMatcher::compile(["/hello(.*)"]).unwrap();
        assert!(m.test("/hello/test/a"));
        assert!(m.test("/hello"));
        assert!(!m.test("/other/hello"));
    }

    #[test]
    fn wildcard_prefix_matches_extension() {
        let m = RouteMatcher::compile(["/(.*).ts"]).unwrap();
        assert!(m.test("/test/hello.ts"));
        assert!(!m.test("/test/hellots"));
    }

    #[test]
    fn literal_pattern_is_exact() {
        let m = RouteMatcher::compile("/test/hello.ts").unwrap();
        assert!(!m.test("/hello.js"));
        assert!(m.test("/test/hello.ts"));
        assert!(m.test("/test/hello.ts/"));
    }

    #[test]
    fn matching_is_case_sensitive_and_ignores_query() {
        let m = RouteMatcher::compile(["/Admin(.*)"]).unwrap();
        assert!(m.test("/Admin/users?page=2"));
        assert!(!m.test("/admin/users"));
    }

    #[test]
    fn named_segments_match_one_segment() {
        let m = RouteMatcher::compile(["/orgs/:slug/settings"]).unwrap();
        assert!(m.test("/orgs/acme/settings"));
        assert!(!m.test("/orgs/acme/x/settings"));
    }

    #[test]
    fn pattern_lists_are_or_combined() {
        let m = RouteMatcher::compile(vec!["/a(.*)", "/b(.*)"]).unwrap();
        assert!(m.test("/a/1"));
        assert!(m.test("/b/2"));
        assert!(!m.test("/c"));
    }

    #[test]
    fn raw_regexes_are_used_as_is() {
        let m = RouteMatcher::compile(RouteSpec::Regex("^/v[0-9]+/".into())).unwrap();
        assert!(m.test("/v1/items"));
        assert!(!m.test("/x/v1/items"));

        let m = RouteMatcher::compile(RouteSpec::Regexes(vec!["^/a$".into(), "^/b$".into()]))
            .unwrap();
        assert!(m.test("/b"));
    }

    #[test]
    fn invalid_regex_fails_at_compile_time() {
        let err = RouteMatcher::compile(RouteSpec::Regex("/(unclosed".into())).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRoutePattern { .. }));

        let err = RouteMatcher::compile(["/bad(["]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRoutePattern { .. }));
    }

    #[test]
    fn predicates_see_the_whole_request() {
        let m = RouteMatcher::from_predicate(|req| *req.method() == axum::http::Method::POST);
        let req = axum::http::Request::post("/anything").body(()).unwrap();
        assert!(m.matches(&RequestInfo::from_request(&req)));
        assert!(!m.test("/anything"));
    }

    #[test]
    fn default_config_skips_internals_and_assets() {
        let m = RouteMatcher::config_default();
        assert!(m.test("/"));
        assert!(m.test("/dashboard"));
        assert!(m.test("/data.json"));
        assert!(m.test("/api/items"));
        assert!(m.test("/api/export.csv"));
        assert!(!m.test("/_next/static/chunk.js"));
        assert!(!m.test("/favicon.ico"));
        assert!(!m.test("/styles/site.css"));
    }

    #[test]
    fn default_config_and_ignored_partition_paths() {
        let processed = RouteMatcher::config_default();
        let ignored = RouteMatcher::ignored_default();
        for path in [
            "/",
            "/dashboard",
            "/_next",
            "/_next/image",
            "/_nextish",
            "/logo.png",
            "/api/logo.png",
            "/trpc/query",
            "/file.JSON",
            "/a/b/c.woff2",
            "/index.html",
        ] {
            assert!(
                processed.test(path) ^ ignored.test(path),
                "{path} is not partitioned"
            );
        }
    }

    #[test]
    fn partition_holds_for_paths_that_are_not_uris() {
        let processed = RouteMatcher::config_default();
        let ignored = RouteMatcher::ignored_default();
        for path in [
            "/a b",
            "/x y.css",
            "/_next/a b",
            "/api/a b.png",
            "/\u{fc}",
            "/a\"b",
            "/a b?q=1#top",
        ] {
            assert!(
                processed.test(path) ^ ignored.test(path),
                "{path} is not partitioned"
            );
        }
        assert!(processed.test("/a b"));
        assert!(processed.test("/\u{fc}"));
        assert!(processed.test("/api/a b.png"));
        assert!(!processed.test("/x y.css"));
        assert!(!processed.test("/_next/a b"));
    }

    #[test]
    fn patterns_match_raw_paths() {
        let m = RouteMatcher::compile(["/docs/:page"]).unwrap();
        assert!(m.test("/docs/getting started"));
        assert!(m.test("/docs/intro#setup"));
        assert!(!m.test("/docs/a b/c"));
    }

    #[test]
    fn predicates_see_percent_encoded_paths() {
        let m = RouteMatcher::from_predicate(|req| req.path() == "/a%20b");
        assert!(m.test("/a b"));
        assert!(m.test("/a%20b"));
        assert!(!m.negate().test("/a b"));
    }

    #[test]
    fn negate_twice_is_identity() {
        let m = RouteMatcher::compile(["/x(.*)"]).unwrap();
        let back = m.negate().negate();
        assert!(back.test("/x/1"));
        assert!(!back.test("/y"));
    }

    #[test]
    fn api_default_matches_api_and_trpc() {
        let m = RouteMatcher::api_default();
        assert!(m.test("/api/items"));
        assert!(m.test("/trpc"));
        assert!(!m.test("/v1/api"));
    }
}
