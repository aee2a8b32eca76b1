// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Auth options: static configuration plus per-request overrides.

use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::tokens::AcceptsToken;
use crate::config::{
    parse_flag, AUTHORIZED_PARTIES_ENV, DEBUG_ENV, DOMAIN_ENV, IS_SATELLITE_ENV, PROXY_URL_ENV,
    PUBLISHABLE_KEY_ENV, SECRET_KEY_ENV, SIGN_IN_URL_ENV, SIGN_UP_URL_ENV,
};
use crate::error::ConfigError;
use crate::keys::{PublishableKey, SecretKey};
use crate::request::{RequestInfo, RequestSnapshot};
use crate::BoxFuture;

/// Default clock skew tolerance for session token timestamps.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(5);

/// Fully resolved options for one request.
#[derive(Debug, Clone)]
pub struct AuthOptions {
    pub publishable_key: PublishableKey,
    pub secret_key: SecretKey,
    pub sign_in_url: Option<String>,
    pub sign_up_url: Option<String>,
    /// Satellite domain.
    pub domain: Option<String>,
    pub proxy_url: Option<String>,
    pub is_satellite: bool,
    /// Accepted `azp` values. Empty means any.
    pub authorized_parties: Vec<String>,
    pub accepts_token: AcceptsToken,
    pub clock_skew: Duration,
    pub debug: bool,
}

impl AuthOptions {
    pub fn new(publishable_key: &str, secret_key: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            publishable_key: PublishableKey::parse(publishable_key)?,
            secret_key: SecretKey::new(secret_key)?,
            sign_in_url: None,
            sign_up_url: None,
            domain: None,
            proxy_url: None,
            is_satellite: false,
            authorized_parties: Vec::new(),
            accepts_token: AcceptsToken::Any,
            clock_skew: DEFAULT_CLOCK_SKEW,
            debug: false,
        })
    }

    /// Load options from the environment (see [`crate::config`]).
    pub fn from_env() -> Result<Self, ConfigError> {
        let publishable_key =
            env::var(PUBLISHABLE_KEY_ENV).map_err(|_| ConfigError::MissingPublishableKey)?;
        let secret_key = env::var(SECRET_KEY_ENV).map_err(|_| ConfigError::MissingSecretKey)?;

        let mut options = Self::new(&publishable_key, &secret_key)?;
        options.sign_in_url = non_empty_env(SIGN_IN_URL_ENV);
        options.sign_up_url = non_empty_env(SIGN_UP_URL_ENV);
        options.domain = non_empty_env(DOMAIN_ENV);
        options.proxy_url = non_empty_env(PROXY_URL_ENV);
        options.is_satellite = non_empty_env(IS_SATELLITE_ENV).is_some_and(|v| parse_flag(&v));
        options.debug = non_empty_env(DEBUG_ENV).is_some_and(|v| parse_flag(&v));
        options.authorized_parties = non_empty_env(AUTHORIZED_PARTIES_ENV)
            .map(|v| split_list(&v))
            .unwrap_or_default();
        Ok(options)
    }

    pub fn with_sign_in_url(mut self, url: impl Into<String>) -> Self {
        self.sign_in_url = Some(url.into());
        self
    }

    pub fn with_sign_up_url(mut self, url: impl Into<String>) -> Self {
        self.sign_up_url = Some(url.into());
        self
    }

    pub fn with_authorized_parties(mut self, parties: Vec<String>) -> Self {
        self.authorized_parties = parties;
        self
    }

    pub fn with_proxy_url(mut self, url: impl Into<String>) -> Self {
        self.proxy_url = Some(url.into());
        self
    }

    pub fn with_satellite_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self.is_satellite = true;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn is_development(&self) -> bool {
        self.publishable_key.is_development()
    }

    /// Sign-in page, falling back to the hosted account portal.
    pub fn sign_in_url(&self) -> String {
        self.sign_in_url
            .clone()
            .unwrap_or_else(|| self.publishable_key.account_portal_url("sign-in"))
    }

    pub fn sign_up_url(&self) -> String {
        self.sign_up_url
            .clone()
            .unwrap_or_else(|| self.publishable_key.account_portal_url("sign-up"))
    }

    /// Base URL of the frontend API that serves handshakes.
    ///
    /// A proxy URL wins, then a satellite domain, then the host encoded in
    /// the publishable key. A relative proxy URL is returned as-is and
    /// resolved against the request origin by the caller.
    pub fn frontend_api_url(&self) -> String {
        if let Some(proxy) = &self.proxy_url {
            return proxy.trim_end_matches('/').to_string();
        }
        if self.is_satellite {
            if let Some(domain) = &self.domain {
                let host = domain
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/');
                return format!("https://clerk.{host}");
            }
        }
        format!("https://{}", self.publishable_key.frontend_api())
    }

    /// Apply a per-request override on top of these options.
    pub fn apply(&mut self, overrides: OptionsOverride) -> Result<(), ConfigError> {
        if let Some(pk) = overrides.publishable_key {
            self.publishable_key = PublishableKey::parse(&pk)?;
        }
        if let Some(sk) = overrides.secret_key {
            self.secret_key = SecretKey::new(sk)?;
        }
        if overrides.sign_in_url.is_some() {
            self.sign_in_url = overrides.sign_in_url;
        }
        if overrides.sign_up_url.is_some() {
            self.sign_up_url = overrides.sign_up_url;
        }
        if overrides.domain.is_some() {
            self.domain = overrides.domain;
        }
        if overrides.proxy_url.is_some() {
            self.proxy_url = overrides.proxy_url;
        }
        if let Some(is_satellite) = overrides.is_satellite {
            self.is_satellite = is_satellite;
        }
        if let Some(parties) = overrides.authorized_parties {
            self.authorized_parties = parties;
        }
        if let Some(debug) = overrides.debug {
            self.debug = debug;
        }
        Ok(())
    }

    /// Options as a log-safe JSON value.
    pub fn redacted(&self) -> serde_json::Value {
        json!({
            "publishable_key": self.publishable_key.as_str(),
            "secret_key": self.secret_key.redacted(),
            "instance_type": self.publishable_key.instance_type().to_string(),
            "sign_in_url": self.sign_in_url,
            "sign_up_url": self.sign_up_url,
            "domain": self.domain,
            "proxy_url": self.proxy_url,
            "is_satellite": self.is_satellite,
            "authorized_parties": self.authorized_parties,
            "accepts_token": self.accepts_token.to_string(),
            "debug": self.debug,
        })
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Partial options supplied per request. Unset fields keep the static value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionsOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publishable_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign_in_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign_up_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_satellite: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorized_parties: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,
}

impl OptionsOverride {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

type SyncOptionsFn = Arc<dyn Fn(&RequestInfo<'_>) -> OptionsOverride + Send + Sync>;
type AsyncOptionsFn =
    Arc<dyn Fn(RequestSnapshot) -> BoxFuture<'static, OptionsOverride> + Send + Sync>;

/// Where per-request options come from.
#[derive(Clone, Default)]
pub enum OptionsResolver {
    #[default]
    Static,
    Sync(SyncOptionsFn),
    Async(AsyncOptionsFn),
}

impl fmt::Debug for OptionsResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionsResolver::Static => f.write_str("Static"),
            OptionsResolver::Sync(_) => f.write_str("Sync(..)"),
            OptionsResolver::Async(_) => f.write_str("Async(..)"),
        }
    }
}

/// Options resolved for one request.
#[derive(Debug, Clone)]
pub struct ResolvedOptions {
    pub options: AuthOptions,
    /// True when a callback changed anything; such options must only be
    /// propagated encrypted.
    pub dynamic: bool,
}

impl OptionsResolver {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&RequestInfo<'_>) -> OptionsOverride + Send + Sync + 'static,
    {
        OptionsResolver::Sync(Arc::new(f))
    }

    pub fn dynamic<F, Fut>(f: F) -> Self
    where
        F: Fn(RequestSnapshot) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = OptionsOverride> + Send + 'static,
    {
        OptionsResolver::Async(Arc::new(
            move |snapshot| -> BoxFuture<'static, OptionsOverride> { Box::pin(f(snapshot)) },
        ))
    }

    pub async fn resolve(
        &self,
        base: &AuthOptions,
        request: &RequestInfo<'_>,
    ) -> Result<ResolvedOptions, ConfigError> {
        let overrides = match self {
            OptionsResolver::Static => OptionsOverride::default(),
            OptionsResolver::Sync(f) => f(request),
            OptionsResolver::Async(f) => f(request.snapshot()).await,
        };

        let dynamic = !overrides.is_empty();
        let mut options = base.clone();
        options.apply(overrides)?;
        Ok(ResolvedOptions { options, dynamic })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::keys::InstanceType;
    use axum::http::Request;

    pub(crate) const TEST_SECRET: &str = "sk_test_0123456789abcdefghij";

    pub(crate) fn test_options() -> AuthOptions {
        let pk = PublishableKey::build("clerk.example.com", InstanceType::Production);
        AuthOptions::new(&pk, TEST_SECRET).unwrap()
    }

    #[test]
    fn sign_in_url_falls_back_to_account_portal() {
        let options = test_options();
        assert_eq!(options.sign_in_url(), "https://accounts.example.com/sign-in");
        let options = options.with_sign_in_url("/sign-in");
        assert_eq!(options.sign_in_url(), "/sign-in");
    }

    #[test]
    fn frontend_api_prefers_proxy_then_satellite() {
        let options = test_options();
        assert_eq!(options.frontend_api_url(), "https://clerk.example.com");

        let satellite = test_options().with_satellite_domain("satellite.dev");
        assert_eq!(satellite.frontend_api_url(), "https://clerk.satellite.dev");

        let proxied = test_options().with_proxy_url("https://app.example.com/__auth/");
        assert_eq!(proxied.frontend_api_url(), "https://app.example.com/__auth");
    }

    #[test]
    fn redacted_options_hide_secret() {
        let value = test_options().redacted();
        let text = value.to_string();
        assert!(!text.contains(TEST_SECRET));
        assert_eq!(value["secret_key"], "sk_test_****ghij");
    }

    #[test]
    fn apply_rejects_bad_publishable_key() {
        let mut options = test_options();
        let err = options
            .apply(OptionsOverride {
                publishable_key: Some("nope".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPublishableKey(_)));
    }

    #[tokio::test]
    async fn static_resolver_is_not_dynamic() {
        let req = Request::get("/").body(()).unwrap();
        let resolved = OptionsResolver::Static
            .resolve(&test_options(), &RequestInfo::from_request(&req))
            .await
            .unwrap();
        assert!(!resolved.dynamic);
    }

    #[tokio::test]
    async fn async_resolver_overrides_by_request() {
        let resolver = OptionsResolver::dynamic(|snapshot: RequestSnapshot| async move {
            if snapshot.uri.path().starts_with("/tenant-b") {
                OptionsOverride {
                    sign_in_url: Some("/b/sign-in".into()),
                    ..Default::default()
                }
            } else {
                OptionsOverride::default()
            }
        });

        let req = Request::get("/tenant-b/home").body(()).unwrap();
        let resolved = resolver
            .resolve(&test_options(), &RequestInfo::from_request(&req))
            .await
            .unwrap();
        assert!(resolved.dynamic);
        assert_eq!(resolved.options.sign_in_url(), "/b/sign-in");

        let req = Request::get("/tenant-a").body(()).unwrap();
        let resolved = resolver
            .resolve(&test_options(), &RequestInfo::from_request(&req))
            .await
            .unwrap();
        assert!(!resolved.dynamic);
    }

    #[tokio::test]
    async fn sync_resolver_runs_per_request() {
        let resolver = OptionsResolver::sync(|req| OptionsOverride {
            debug: Some(req.path() == "/debug"),
            ..Default::default()
        });
        let req = Request::get("/debug").body(()).unwrap();
        let resolved = resolver
            .resolve(&test_options(), &RequestInfo::from_request(&req))
            .await
            .unwrap();
        assert!(resolved.options.debug);
    }
}
